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
use tokio::runtime::Handle;

use crate::barrier::{Barrier, BarrierId};
use crate::controller::BarrierController;
use crate::sort_replayer::SortReplayer;
use crate::{BarrierError, Result};

/// A pure transformation over the sorted list of inputs that arrived at a
/// [`CountedBarrierController`], producing an equal-length list of results.
///
/// Boxed so the controller can hold one without an extra type parameter; the
/// controller requires `T: Ord` only because this action sees `T` sorted.
#[async_trait]
pub trait AggregateAction<T>: Send + Sync {
    async fn aggregate(&self, sorted_inputs: Vec<T>) -> std::result::Result<Vec<T>, crate::error::BoxedError>;
}

#[async_trait]
impl<T, F, Fut> AggregateAction<T> for F
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = std::result::Result<Vec<T>, crate::error::BoxedError>> + Send,
{
    async fn aggregate(&self, sorted_inputs: Vec<T>) -> std::result::Result<Vec<T>, crate::error::BoxedError> {
        (self)(sorted_inputs).await
    }
}

/// Whether a registered barrier has reached [`BarrierController::on_barrier_blocked`] yet.
struct Entry<T> {
    barrier: Barrier<T>,
    blocked: bool,
}

struct Members<T> {
    /// Registration-ordered; cleared wholesale after every lift or interrupt
    /// cascade (§4.4.4/§4.4.5), matching the "cyclic reference avoidance"
    /// note in spec.md §9 — no weak back-references are needed because
    /// nothing outlives a single batch.
    barriers: IndexMap<BarrierId, Entry<T>>,
    capacity: usize,
    registered_count: usize,
    arrival_count: usize,
    interrupted: bool,
    should_expect_absentees: bool,
}

/// Lifts its members automatically once a configured number have arrived,
/// optionally running an aggregate transformation over the sorted arrivals
/// first.
///
/// `capacity` starts effectively unbounded (`usize::MAX`) until
/// [`CountedBarrierController::set_capacity`] is called. The controller's
/// own mutex is released before any `.await` — the aggregation phase takes a
/// snapshot under the lock, then proceeds lock-free on captured locals, per
/// spec.md §5.
pub struct CountedBarrierController<T: Ord + Send + 'static> {
    members: Mutex<Members<T>>,
    aggregate: Option<Box<dyn AggregateAction<T>>>,
    runtime: Handle,
}

impl<T: Ord + Send + Sync + 'static> CountedBarrierController<T> {
    /// Builds a controller with no capacity limit yet and no aggregate
    /// action: arrivals pass their own input straight through once
    /// `set_capacity` is eventually reached.
    ///
    /// `runtime` is the executor used to spawn the "fresh fiber" (spec.md
    /// §4.4.3/§9) when `set_capacity` triggers an aggregation from a caller
    /// that is not itself one of the arrivals.
    pub fn new(runtime: Handle) -> Arc<Self> {
        Self::with_aggregate(runtime, None)
    }

    /// Builds a controller whose lift phase runs `aggregate` over the
    /// stably-sorted arrived inputs before delivering results (§4.4.4).
    pub fn with_aggregate(runtime: Handle, aggregate: Option<Box<dyn AggregateAction<T>>>) -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(Members {
                barriers: IndexMap::new(),
                capacity: usize::MAX,
                registered_count: 0,
                arrival_count: 0,
                interrupted: false,
                should_expect_absentees: false,
            }),
            aggregate,
            runtime,
        })
    }

    pub fn capacity(&self) -> usize {
        self.members.lock().capacity
    }

    pub fn arrival_count(&self) -> usize {
        self.members.lock().arrival_count
    }

    pub fn registered_count(&self) -> usize {
        self.members.lock().registered_count
    }

    pub fn is_interrupted(&self) -> bool {
        self.members.lock().interrupted
    }

    /// Sets the controller's capacity. Rejects with
    /// `CapacityBelowRegistered` if `new` is below the number of barriers
    /// already registered (§4.4.3). If the new capacity is immediately met
    /// by the current arrival count, spawns a fresh task to run the
    /// aggregation phase, since the caller here is not itself one of the
    /// blocked arrivals and cannot perform it inline (§4.4.3, §9 "global
    /// scope launch").
    pub fn set_capacity(self: &Arc<Self>, new: usize) -> Result<()> {
        let should_finalize = {
            let mut members = self.members.lock();
            if new < members.registered_count {
                return Err(BarrierError::CapacityBelowRegistered {
                    requested: new,
                    registered: members.registered_count,
                });
            }
            members.capacity = new;
            members.arrival_count == members.capacity && members.capacity > 0
        };

        if should_finalize {
            self.spawn_finalize();
        }
        Ok(())
    }

    /// Like `set_capacity`, but for the upstream-failure path (§4.4.6):
    /// truncates `registered_count` down to `new` (some already-registered
    /// barriers will now never arrive) and marks the controller to expect
    /// absentees during the next aggregation.
    fn change_capacity_due_to_error(self: &Arc<Self>, new: usize) {
        let should_finalize = {
            let mut members = self.members.lock();
            if members.interrupted {
                return;
            }
            members.registered_count = members.registered_count.min(new);
            members.capacity = new;
            members.should_expect_absentees = true;
            members.arrival_count == members.capacity && members.capacity > 0
        };

        if should_finalize {
            self.spawn_finalize();
        }
    }

    /// Called by the orchestrator (§4.5) when an ordinary step upstream of
    /// this controller has exhausted its retry budget and will never reach
    /// this barrier stage again. Shrinks capacity by one so the remaining
    /// arrivals are not deadlocked waiting for a passenger that is never
    /// coming.
    pub fn notify_error(self: &Arc<Self>) {
        let new_capacity = {
            let members = self.members.lock();
            members.capacity.saturating_sub(1)
        };
        self.change_capacity_due_to_error(new_capacity);
    }

    fn spawn_finalize(self: &Arc<Self>) {
        let this = self.clone();
        self.runtime.spawn(async move {
            if let Err(err) = this.finalize().await {
                tracing::warn!(error = %err, "aggregation triggered by a capacity change failed");
            }
        });
    }

    /// Runs the aggregation / lift phase (§4.4.4). May suspend inside the
    /// aggregate action. Takes a snapshot of the currently-blocked barriers
    /// under the lock, then proceeds lock-free on captured locals.
    ///
    /// On any failure in this phase — an absentee without a prior error
    /// signal, a missing captured input, or the aggregate action itself
    /// failing or returning the wrong number of results — every barrier in
    /// `blocked` (including the one whose own arrival triggered this call)
    /// is failed with the identical cause via `fail_batch`, per spec.md §7.
    async fn finalize(&self) -> Result<()> {
        let (blocked, absentee_count, should_expect_absentees) = {
            let mut members = self.members.lock();
            let blocked: Vec<Barrier<T>> = members
                .barriers
                .values()
                .filter(|entry| entry.blocked)
                .map(|entry| entry.barrier.clone())
                .collect();
            let absentee_count = members.barriers.len() - blocked.len();
            let should_expect_absentees = members.should_expect_absentees;
            members.barriers.clear();
            (blocked, absentee_count, should_expect_absentees)
        };

        if absentee_count != 0 && !should_expect_absentees {
            let cause = BarrierError::InternalInvariant(format!(
                "{} absentee barrier(s) with no prior error signal",
                absentee_count
            ));
            return Err(self.fail_batch(blocked, cause));
        }

        let mut inputs = Vec::with_capacity(blocked.len());
        let mut missing_input = false;
        for barrier in &blocked {
            match barrier.take_input() {
                Some(input) => inputs.push(input),
                None => {
                    missing_input = true;
                    break;
                }
            }
        }
        if missing_input {
            let cause = BarrierError::InternalInvariant("blocked barrier has no captured input".to_string());
            return Err(self.fail_batch(blocked, cause));
        }

        let results = match &self.aggregate {
            None => inputs,
            Some(aggregate) => {
                let (sorted_inputs, replayer) = SortReplayer::sort(inputs);
                let expected = sorted_inputs.len();
                match aggregate.aggregate(sorted_inputs).await {
                    Ok(sorted_outputs) if sorted_outputs.len() == expected => replayer.unsort(sorted_outputs),
                    Ok(sorted_outputs) => {
                        let got = sorted_outputs.len();
                        let cause = BarrierError::BadAggregatorOutput { expected, got };
                        return Err(self.fail_batch(blocked, cause));
                    }
                    Err(cause) => {
                        let cause = BarrierError::AggregateFailed(cause);
                        return Err(self.fail_batch(blocked, cause));
                    }
                }
            }
        };

        for (barrier, result) in blocked.into_iter().zip(results) {
            barrier.lift_with(result);
        }
        Ok(())
    }

    /// Wraps `cause` in a shared, reference-counted form and fails every
    /// barrier in `blocked` with it — including the barrier whose own
    /// `on_barrier_blocked` call is running this aggregation inline, since
    /// its caller is the one returning this very value. Every barrier in the
    /// batch therefore resolves to `Err(BarrierError::Shared(cause))` with
    /// an identical cause, per spec.md §7 ("the exception propagates to
    /// every waiting arrival; each sees the same cause").
    fn fail_batch(&self, blocked: Vec<Barrier<T>>, cause: BarrierError) -> BarrierError {
        let cause = Arc::new(cause);
        for barrier in blocked {
            barrier.fail(cause.clone());
        }
        BarrierError::Shared(cause)
    }
}

#[async_trait]
impl<T: Ord + Send + Sync + 'static> BarrierController<T> for CountedBarrierController<T> {
    fn on_barrier_created(&self, barrier: &Barrier<T>) -> Result<()> {
        let mut members = self.members.lock();
        if members.barriers.contains_key(&barrier.id()) {
            return Err(BarrierError::DuplicateRegistration);
        }
        if members.interrupted {
            drop(members);
            barrier.interrupt();
            return Ok(());
        }
        if members.registered_count >= members.capacity {
            return Err(BarrierError::CapacityExceeded {
                capacity: members.capacity,
            });
        }
        members.registered_count += 1;
        members.barriers.insert(
            barrier.id(),
            Entry {
                barrier: barrier.clone(),
                blocked: false,
            },
        );
        Ok(())
    }

    async fn on_barrier_blocked(&self, barrier: &Barrier<T>) -> Result<()> {
        let should_finalize = {
            let mut members = self.members.lock();
            match members.barriers.get_mut(&barrier.id()) {
                None if members.interrupted => return Ok(()),
                None => return Err(BarrierError::UnknownBarrier),
                Some(entry) if entry.blocked => return Err(BarrierError::DoubleBlock),
                Some(entry) => entry.blocked = true,
            }
            members.arrival_count += 1;
            members.arrival_count == members.capacity
        };

        if should_finalize {
            // Run inline on the arriving fiber: no new task is needed in the
            // hot path (§4.4.2).
            self.finalize().await?;
        }
        Ok(())
    }

    fn on_barrier_interrupted(&self, barrier: &Barrier<T>) -> Result<()> {
        let siblings = {
            let mut members = self.members.lock();
            if !members.barriers.contains_key(&barrier.id()) {
                if members.interrupted {
                    return Ok(());
                }
                return Err(BarrierError::UnknownBarrier);
            }
            members.interrupted = true;
            let siblings: Vec<Barrier<T>> = members
                .barriers
                .iter()
                .filter(|(id, _)| **id != barrier.id())
                .map(|(_, entry)| entry.barrier.clone())
                .collect();
            members.barriers.clear();
            siblings
        };

        for sibling in siblings {
            sibling.interrupt();
        }
        Ok(())
    }
}
