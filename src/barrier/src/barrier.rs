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

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::controller::BarrierController;
use crate::{BarrierError, Result};

/// Identifies a [`Barrier`] for the purposes of a controller's membership
/// map. Cheap to copy, independent of the payload type `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierId(Uuid);

impl BarrierId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// `Fresh -> Armed -> (Lifted | Interrupted | Failed)`. Transitions are
/// monotone: once in any of the three terminal phases, further
/// `lift`/`interrupt`/`fail` calls are no-ops.
///
/// `Failed` is not part of spec.md's own state machine (§4.1 only names
/// `Lifted`/`Interrupted`); it is this crate's way of surfacing a
/// `CountedBarrierController` aggregation failure to every blocked sibling
/// with the identical cause, per spec.md §7 ("the exception propagates to
/// every waiting arrival; each sees the same cause") — see
/// `CountedBarrierController::fail_batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Armed,
    Lifted,
    Interrupted,
    Failed,
}

struct State<T> {
    phase: Phase,
    input: Option<T>,
    override_result: Option<T>,
    failure: Option<Arc<BarrierError>>,
    invoked: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

/// A single-use suspend-until-lifted rendezvous point.
///
/// Constructing a barrier synchronously registers it with its owning
/// controller (`BarrierController::on_barrier_created`). `invoke` may be
/// called at most once; it captures its input, tells the controller the
/// barrier is now blocked, and suspends until some other actor calls `lift`
/// or `interrupt` on a clone of this same handle.
pub struct Barrier<T> {
    id: BarrierId,
    shared: Arc<Shared<T>>,
    controller: Arc<dyn BarrierController<T>>,
}

impl<T> Clone for Barrier<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: self.shared.clone(),
            controller: self.controller.clone(),
        }
    }
}

impl<T: Send + 'static> Barrier<T> {
    /// Creates a fresh barrier and synchronously registers it with
    /// `controller`. If registration fails (e.g. `CapacityExceeded`), the
    /// barrier is never returned to the caller.
    pub fn new(controller: Arc<dyn BarrierController<T>>) -> Result<Self> {
        let barrier = Self {
            id: BarrierId::new(),
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    phase: Phase::Fresh,
                    input: None,
                    override_result: None,
                    failure: None,
                    invoked: false,
                }),
                notify: Notify::new(),
            }),
            controller,
        };
        barrier.controller.on_barrier_created(&barrier)?;
        Ok(barrier)
    }

    pub fn id(&self) -> BarrierId {
        self.id
    }

    /// Records `input`, notifies the controller that this barrier is now
    /// blocked (unless it was already lifted or interrupted before this
    /// call), then suspends until the barrier reaches a terminal state.
    ///
    /// Returns the override result supplied to `lift`, the original `input`
    /// if no override was supplied, or `None` if the barrier was
    /// interrupted. Fails with `AlreadyInvoked` on a second call, or with
    /// `BarrierError::Shared` if the owning controller failed this barrier
    /// (e.g. a `CountedBarrierController` aggregation failure shared across
    /// the whole arrived batch, per spec.md §7).
    pub async fn invoke(&self, input: T) -> Result<Option<T>> {
        let already_terminal = {
            let mut state = self.shared.state.lock();
            if state.invoked {
                return Err(BarrierError::AlreadyInvoked);
            }
            state.invoked = true;

            match state.phase {
                Phase::Lifted | Phase::Interrupted | Phase::Failed => true,
                Phase::Fresh => {
                    state.input = Some(input);
                    state.phase = Phase::Armed;
                    false
                }
                Phase::Armed => unreachable!("invoke is guarded by the `invoked` flag"),
            }
        };

        if already_terminal {
            // Arming never happened, so `on_barrier_blocked` must never be
            // called (the "lift/interrupt raced ahead of invoke" case).
            return self.resolve();
        }

        self.controller.on_barrier_blocked(self).await?;

        loop {
            let notified = self.shared.notify.notified();
            {
                let state = self.shared.state.lock();
                if matches!(state.phase, Phase::Lifted | Phase::Interrupted | Phase::Failed) {
                    break;
                }
            }
            notified.await;
        }

        self.resolve()
    }

    fn resolve(&self) -> Result<Option<T>> {
        let mut state = self.shared.state.lock();
        match state.phase {
            Phase::Interrupted => Ok(None),
            Phase::Lifted => Ok(state.override_result.take().or_else(|| state.input.take())),
            Phase::Failed => Err(BarrierError::Shared(
                state.failure.take().expect("Failed phase always carries a cause"),
            )),
            Phase::Fresh | Phase::Armed => unreachable!("resolve is only called once terminal"),
        }
    }

    /// Lifts this barrier, delivering its original `input` (or no value, if
    /// `invoke` raced ahead and has not captured one yet — delivering the
    /// absent value only happens via `interrupt`). A no-op once this barrier
    /// is already terminal.
    pub fn lift(&self) {
        self.lift_inner(None)
    }

    /// Lifts this barrier, overriding the delivered result with `result`.
    /// A no-op once this barrier is already terminal; in particular, a
    /// second `lift` call after the first never overwrites the recorded
    /// override.
    pub fn lift_with(&self, result: T) {
        self.lift_inner(Some(result))
    }

    fn lift_inner(&self, result: Option<T>) {
        {
            let mut state = self.shared.state.lock();
            match state.phase {
                Phase::Fresh | Phase::Armed => {
                    state.phase = Phase::Lifted;
                    state.override_result = result;
                }
                Phase::Lifted | Phase::Interrupted | Phase::Failed => return,
            }
        }
        self.shared.notify.notify_waiters();
    }

    /// Interrupts this barrier. A no-op once already terminal. Wakes any
    /// in-flight `invoke`, which then yields the absent value regardless of
    /// any prior `lift` race.
    pub fn interrupt(&self) {
        let became_interrupted = {
            let mut state = self.shared.state.lock();
            match state.phase {
                Phase::Fresh | Phase::Armed => {
                    state.phase = Phase::Interrupted;
                    true
                }
                Phase::Lifted | Phase::Interrupted | Phase::Failed => false,
            }
        };
        if became_interrupted {
            self.shared.notify.notify_waiters();
            if let Err(err) = self.controller.on_barrier_interrupted(self) {
                tracing::warn!(error = %err, "on_barrier_interrupted callback failed");
            }
        }
    }

    /// Fails this barrier with `cause`, shared by reference count with every
    /// other barrier in the same aggregation batch. A no-op once already
    /// terminal. Wakes any in-flight `invoke`, which then yields
    /// `Err(BarrierError::Shared(cause))` — the same cause every sibling in
    /// the batch observes, per spec.md §7. Crate-visible only:
    /// `CountedBarrierController` is the sole caller, via `fail_batch`.
    pub(crate) fn fail(&self, cause: Arc<BarrierError>) {
        let became_failed = {
            let mut state = self.shared.state.lock();
            match state.phase {
                Phase::Fresh | Phase::Armed => {
                    state.phase = Phase::Failed;
                    state.failure = Some(cause);
                    true
                }
                Phase::Lifted | Phase::Interrupted | Phase::Failed => false,
            }
        };
        if became_failed {
            self.shared.notify.notify_waiters();
        }
    }

    /// Moves the captured input out, if any. Crate-visible only:
    /// `CountedBarrierController` uses this during aggregation (§4.4.4) to
    /// collect arrived inputs without requiring `T: Clone`.
    pub(crate) fn take_input(&self) -> Option<T> {
        self.shared.state.lock().input.take()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    struct CountingController {
        created: AtomicUsize,
        blocked: AtomicUsize,
        interrupted: AtomicUsize,
    }

    impl CountingController {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: AtomicUsize::new(0),
                blocked: AtomicUsize::new(0),
                interrupted: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl<T: Send + Sync + 'static> BarrierController<T> for CountingController {
        fn on_barrier_created(&self, _barrier: &Barrier<T>) -> Result<()> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_barrier_blocked(&self, _barrier: &Barrier<T>) -> Result<()> {
            self.blocked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_barrier_interrupted(&self, _barrier: &Barrier<T>) -> Result<()> {
            self.interrupted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // S1 — manual lift after arrive.
    #[tokio::test]
    async fn lift_after_arrive_delivers_input() {
        let controller = CountingController::new();
        let barrier: Barrier<&'static str> = Barrier::new(controller.clone()).unwrap();

        let waiting = barrier.clone();
        let handle = tokio::spawn(async move { waiting.invoke("input").await });

        // Give the spawned task a chance to reach `Armed` and call back.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        barrier.lift();
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, Some("input"));
        assert_eq!(controller.blocked.load(Ordering::SeqCst), 1);
    }

    // Invariant 5 — lift-before-arrive short-circuits and never blocks.
    #[tokio::test]
    async fn lift_before_invoke_short_circuits() {
        let controller = CountingController::new();
        let barrier: Barrier<i32> = Barrier::new(controller.clone()).unwrap();

        barrier.lift_with(42);
        let result = barrier.invoke(7).await.unwrap();

        assert_eq!(result, Some(42));
        assert_eq!(controller.blocked.load(Ordering::SeqCst), 0);
    }

    // Invariant 6 — interrupt wins over a late lift.
    #[tokio::test]
    async fn interrupt_wins_over_late_lift() {
        let controller = CountingController::new();
        let barrier: Barrier<i32> = Barrier::new(controller.clone()).unwrap();

        barrier.interrupt();
        barrier.lift_with(99);
        let result = barrier.invoke(7).await.unwrap();

        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn second_invoke_fails() {
        let controller = CountingController::new();
        let barrier: Barrier<i32> = Barrier::new(controller).unwrap();
        barrier.lift();
        assert!(barrier.invoke(1).await.is_ok());
        assert_matches!(barrier.invoke(2).await, Err(BarrierError::AlreadyInvoked));
    }

    #[tokio::test]
    async fn second_lift_does_not_overwrite_result() {
        let controller = CountingController::new();
        let barrier: Barrier<i32> = Barrier::new(controller).unwrap();
        barrier.lift_with(1);
        barrier.lift_with(2);
        assert_eq!(barrier.invoke(0).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn fail_wakes_a_waiting_invoke_with_the_shared_cause() {
        let controller = CountingController::new();
        let barrier: Barrier<i32> = Barrier::new(controller.clone()).unwrap();

        let waiting = barrier.clone();
        let handle = tokio::spawn(async move { waiting.invoke(1).await });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        let cause = Arc::new(BarrierError::InternalInvariant("boom".to_string()));
        barrier.fail(cause);
        let err = handle.await.unwrap().unwrap_err();
        assert_matches!(err, BarrierError::Shared(_));
        assert_eq!(err.to_string(), "internal invariant violated: boom");
    }

    #[tokio::test]
    async fn fail_after_lift_does_not_overwrite_the_result() {
        let controller = CountingController::new();
        let barrier: Barrier<i32> = Barrier::new(controller).unwrap();
        barrier.lift_with(7);
        barrier.fail(Arc::new(BarrierError::InternalInvariant("too late".to_string())));
        assert_eq!(barrier.invoke(0).await.unwrap(), Some(7));
    }
}
