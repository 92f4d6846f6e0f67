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

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use transit_barrier::BarrierController;
use transit_common::Result;

/// A pure transform from one payload to the next, run by an ordinary
/// (non-barrier) step. Mirrors `AggregateAction` in `transit_barrier`: a
/// blanket impl lets plain async closures be used directly.
#[async_trait]
pub trait Transform<T>: Send + Sync {
    async fn apply(&self, input: T) -> Result<T>;
}

#[async_trait]
impl<T, F, Fut> Transform<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send,
{
    async fn apply(&self, input: T) -> Result<T> {
        (self)(input).await
    }
}

/// Either an ordinary transform or a barrier rendezvous, per spec.md §6's
/// `StepDescriptor` sketch.
pub enum StepOperation<T> {
    Transform(Box<dyn Transform<T>>),
    Barrier(Arc<dyn BarrierController<T>>),
}

/// `(name, attempts, operation)`, per spec.md §6. `attempts` is only
/// consulted for `Transform` steps; barrier steps are never retried (a
/// barrier is single-use by construction).
pub struct StepDescriptor<T> {
    pub name: String,
    pub attempts: u32,
    pub operation: StepOperation<T>,
}

impl<T: Send + 'static> StepDescriptor<T> {
    /// Builds an ordinary step. `attempts` of `0` is treated as `1` ("no
    /// retry"), per spec.md §6.
    pub fn transform(name: impl Into<String>, attempts: u32, transform: impl Transform<T> + 'static) -> Self {
        Self {
            name: name.into(),
            attempts: attempts.max(1),
            operation: StepOperation::Transform(Box::new(transform)),
        }
    }

    /// Builds a barrier step against `controller`.
    pub fn barrier(name: impl Into<String>, controller: Arc<dyn BarrierController<T>>) -> Self {
        Self {
            name: name.into(),
            attempts: 1,
            operation: StepOperation::Barrier(controller),
        }
    }
}
