// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::barrier::{Barrier, BarrierId};
use crate::controller::BarrierController;
use crate::{BarrierError, Result};

/// A group of barriers released together on an external signal.
///
/// Registration is order-preserving (`IndexMap`); `lift` releases every
/// current member with its own captured input, in registration order, and
/// then empties the set so the controller is immediately reusable for a
/// fresh cycle of registrations. There is no "latch" that keeps lifting new
/// arrivals automatically — each cycle needs its own explicit `lift()`.
pub struct ManualBarrierController<T> {
    members: Mutex<IndexMap<BarrierId, Barrier<T>>>,
}

impl<T: Send + 'static> ManualBarrierController<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(IndexMap::new()),
        })
    }

    /// Lifts every currently-registered member with its own captured input,
    /// in registration order, then clears the set.
    pub fn lift(&self) {
        let members = std::mem::take(&mut *self.members.lock());
        for (_, barrier) in members {
            barrier.lift();
        }
    }

    /// Interrupts every currently-registered member, then clears the set.
    pub fn interrupt(&self) {
        let members = std::mem::take(&mut *self.members.lock());
        for (_, barrier) in members {
            barrier.interrupt();
        }
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> BarrierController<T> for ManualBarrierController<T> {
    fn on_barrier_created(&self, barrier: &Barrier<T>) -> Result<()> {
        let mut members = self.members.lock();
        if members.contains_key(&barrier.id()) {
            return Err(BarrierError::DuplicateRegistration);
        }
        members.insert(barrier.id(), barrier.clone());
        Ok(())
    }

    async fn on_barrier_blocked(&self, _barrier: &Barrier<T>) -> Result<()> {
        // Membership was already recorded at registration; arrival itself
        // triggers no automatic lift.
        Ok(())
    }

    fn on_barrier_interrupted(&self, barrier: &Barrier<T>) -> Result<()> {
        // Sparse failures are tolerated: remove the one member, no cascade.
        self.members.lock().shift_remove(&barrier.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S1 — manual lift after arrive.
    #[tokio::test]
    async fn lift_after_arrive_delivers_input() {
        let controller = ManualBarrierController::new();
        let barrier: Barrier<&'static str> = Barrier::new(controller.clone()).unwrap();

        let waiting = barrier.clone();
        let handle = tokio::spawn(async move { waiting.invoke("input").await });

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        controller.lift();
        assert_eq!(handle.await.unwrap().unwrap(), Some("input"));
        assert!(controller.is_empty());
    }

    #[tokio::test]
    async fn interrupted_member_is_not_cascaded() {
        let controller = ManualBarrierController::new();
        let a: Barrier<i32> = Barrier::new(controller.clone()).unwrap();
        let b: Barrier<i32> = Barrier::new(controller.clone()).unwrap();

        a.interrupt();
        assert_eq!(controller.len(), 1, "only `a` is removed from the set");

        let handle = {
            let b2 = b.clone();
            tokio::spawn(async move { b2.invoke(2).await })
        };
        tokio::task::yield_now().await;
        controller.lift();
        assert_eq!(handle.await.unwrap().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let controller = ManualBarrierController::<i32>::new();
        let barrier: Barrier<i32> = Barrier::new(controller.clone()).unwrap();
        let err = controller.on_barrier_created(&barrier).unwrap_err();
        assert!(matches!(err, BarrierError::DuplicateRegistration));
    }
}
