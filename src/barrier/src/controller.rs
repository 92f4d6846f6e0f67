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

use async_trait::async_trait;

use crate::barrier::Barrier;
use crate::Result;

/// Observes lifecycle events from the barriers it owns. `Barrier<T>` drives
/// these callbacks; implementations decide when to lift or interrupt their
/// members.
///
/// `on_barrier_blocked` is the only callback allowed to suspend: it is only
/// ever called while a pipeline instance is already parked inside
/// `Barrier::invoke`, so an implementation that runs the aggregation phase
/// (`CountedBarrierController`) can do so inline on the arriving task.
#[async_trait]
pub trait BarrierController<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Synchronous registration. Called once, right after a fresh barrier is
    /// constructed against this controller.
    fn on_barrier_created(&self, barrier: &Barrier<T>) -> Result<()>;

    /// `barrier` has captured its input and is now suspended in `invoke`.
    async fn on_barrier_blocked(&self, barrier: &Barrier<T>) -> Result<()>;

    /// `barrier` became `Interrupted`. Synchronous: implementations must not
    /// await here, only update bookkeeping and forward interruption to
    /// siblings if the controller's semantics call for a cascade.
    fn on_barrier_interrupted(&self, barrier: &Barrier<T>) -> Result<()>;
}
