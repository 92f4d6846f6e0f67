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

use transit_barrier::{Barrier, BarrierController, CountedBarrierController};
use transit_common::{BarrierError, Passenger};

use crate::logger::{Logger, TracingLogger};
use crate::step::{StepDescriptor, StepOperation};

/// How a pipeline instance concluded, mirroring §4.5's three outcomes for a
/// single passenger: it ran every step, it was interrupted at a barrier, or
/// an ordinary step exhausted its retry budget (or a barrier step itself
/// failed, e.g. `BadAggregatorOutput`).
#[derive(Debug)]
pub enum PipelineOutcome<T> {
    Completed(Passenger<T>),
    Interrupted,
    Failed(BarrierError),
}

/// Analogous to the teacher's `env.opts` bag (`enable_recovery`,
/// `checkpoint_interval`, `in_flight_barrier_nums`): a small knob set read
/// once at orchestrator construction, not mutated afterwards.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Applied to any step whose own `attempts` is `0`.
    pub default_attempts: u32,
    /// When `true`, an interrupted passenger is logged at `warn` instead of
    /// `debug` — interruption is an expected outcome (§7), not an error, but
    /// some deployments want it visible at a louder level.
    pub log_interruptions_at_warn: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_attempts: 1,
            log_interruptions_at_warn: false,
        }
    }
}

/// Runs a passenger through an ordered list of steps, cooperating with
/// barrier steps per spec.md §4.5 and feeding ordinary-step failures back to
/// every `CountedBarrierController` the pipeline owns (§4.5's `onStepFailed`
/// cascade).
///
/// `T: Clone` is this crate's addition beyond the core barrier subsystem
/// (which never requires it, see `Barrier::take_input`): a retried transform
/// step needs its original input back on failure, and a barrier step needs
/// to keep the enclosing `Passenger` alive across `invoke` without consuming
/// it. See DESIGN.md for the tradeoff.
pub struct PipelineOrchestrator<T: Ord + Clone + Send + Sync + 'static> {
    steps: Vec<StepDescriptor<T>>,
    counted_barriers: Vec<Arc<CountedBarrierController<T>>>,
    config: OrchestratorConfig,
    logger: Arc<dyn Logger>,
}

impl<T: Ord + Clone + Send + Sync + 'static> PipelineOrchestrator<T> {
    pub fn new(steps: Vec<StepDescriptor<T>>, counted_barriers: Vec<Arc<CountedBarrierController<T>>>) -> Self {
        Self::with_config(steps, counted_barriers, OrchestratorConfig::default(), Arc::new(TracingLogger))
    }

    pub fn with_config(
        steps: Vec<StepDescriptor<T>>,
        counted_barriers: Vec<Arc<CountedBarrierController<T>>>,
        config: OrchestratorConfig,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            steps,
            counted_barriers,
            config,
            logger,
        }
    }

    /// Runs `passenger` through every step in order. Returns as soon as a
    /// barrier yields the absent value (interrupted) or a step fails.
    pub async fn run(&self, passenger: Passenger<T>) -> PipelineOutcome<T> {
        let mut current = passenger;

        for step in &self.steps {
            match &step.operation {
                StepOperation::Transform(transform) => {
                    let attempts = if step.attempts == 0 {
                        self.config.default_attempts.max(1)
                    } else {
                        step.attempts
                    };

                    let mut last_err = None;
                    let mut succeeded = None;
                    for attempt in 1..=attempts {
                        match transform.apply(current.data().clone()).await {
                            Ok(data) => {
                                succeeded = Some(data);
                                break;
                            }
                            Err(err) => {
                                tracing::warn!(step = %step.name, attempt, error = %err, "step attempt failed");
                                last_err = Some(err);
                            }
                        }
                    }

                    match succeeded {
                        Some(data) => current = current.with(data),
                        None => {
                            let cause = last_err.expect("attempts is always >= 1");
                            tracing::error!(step = %step.name, error = %cause, "step exhausted retry budget");
                            self.on_step_failed(&cause, None);
                            return PipelineOutcome::Failed(cause);
                        }
                    }
                }
                StepOperation::Barrier(controller) => {
                    let barrier = match Barrier::new(controller.clone()) {
                        Ok(barrier) => barrier,
                        Err(cause) => {
                            self.on_step_failed(&cause, Some(controller));
                            return PipelineOutcome::Failed(cause);
                        }
                    };

                    match barrier.invoke(current.data().clone()).await {
                        Ok(Some(result)) => current = current.with(result),
                        Ok(None) => {
                            if self.config.log_interruptions_at_warn {
                                self.logger.warn(&format!("step {:?} interrupted passenger {}", step.name, current.id()));
                            } else {
                                tracing::debug!(step = %step.name, passenger = %current.id(), "passenger interrupted at barrier");
                            }
                            return PipelineOutcome::Interrupted;
                        }
                        Err(cause) => {
                            tracing::error!(step = %step.name, error = %cause, "barrier step failed");
                            self.on_step_failed(&cause, Some(controller));
                            return PipelineOutcome::Failed(cause);
                        }
                    }
                }
            }
        }

        PipelineOutcome::Completed(current)
    }

    /// §4.5: when a step fails after exhausting retries, wake every
    /// `CountedBarrierController` this pipeline owns that has not yet
    /// reached capacity and is not itself the originator of the failure —
    /// this passenger will never reach it now, so a controller waiting on a
    /// fixed capacity would otherwise deadlock forever.
    ///
    /// `originator` is the controller whose own barrier step produced
    /// `cause`, if any; compared by `Arc::ptr_eq` (reference identity, not
    /// structural equality — spec.md §9) against each owned controller,
    /// coerced to the same `Arc<dyn BarrierController<T>>` shape.
    fn on_step_failed(&self, _cause: &BarrierError, originator: Option<&Arc<dyn BarrierController<T>>>) {
        for controller in &self.counted_barriers {
            if controller.arrival_count() >= controller.capacity() {
                continue;
            }
            let as_trait_object: Arc<dyn BarrierController<T>> = controller.clone();
            if let Some(origin) = originator {
                if Arc::ptr_eq(origin, &as_trait_object) {
                    continue;
                }
            }
            controller.notify_error();
        }
    }
}
