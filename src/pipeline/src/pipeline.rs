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
use std::time::SystemTime;

use tokio::sync::oneshot;
use transit_barrier::{CountedBarrierController, ManualBarrierController};
use transit_common::{BarrierError, Passenger, Result};
use uuid::Uuid;

use crate::orchestrator::{PipelineOrchestrator, PipelineOutcome};
use crate::repository::{JobRecord, Repository};

/// A handle to one passenger's in-flight (or finished) trip through a
/// [`Pipeline`], per spec.md §6's `Pipeline<T>.push(...) -> Job<T>`.
pub struct Job<T> {
    tag: String,
    outcome: oneshot::Receiver<PipelineOutcome<T>>,
}

impl<T> Job<T> {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Awaits the orchestration's outcome. Fails only if the orchestration
    /// task itself was dropped without completing, which does not happen in
    /// ordinary operation.
    pub async fn outcome(self) -> Result<PipelineOutcome<T>> {
        self.outcome
            .await
            .map_err(|_| BarrierError::InternalInvariant("orchestration task dropped its result sender".to_string()))
    }
}

/// The surface API a caller uses to push work into a pipeline and to reach
/// into its owned barrier controllers, per spec.md §6.
pub struct Pipeline<T: Ord + Clone + Send + Sync + 'static> {
    orchestrator: Arc<PipelineOrchestrator<T>>,
    repository: Arc<dyn Repository>,
    manual_barriers: Vec<Arc<ManualBarrierController<T>>>,
    counted_barriers: Vec<Arc<CountedBarrierController<T>>>,
    runtime: tokio::runtime::Handle,
}

impl<T: Ord + Clone + Send + Sync + 'static> Pipeline<T> {
    pub fn new(
        orchestrator: PipelineOrchestrator<T>,
        repository: Arc<dyn Repository>,
        manual_barriers: Vec<Arc<ManualBarrierController<T>>>,
        counted_barriers: Vec<Arc<CountedBarrierController<T>>>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            repository,
            manual_barriers,
            counted_barriers,
            runtime,
        }
    }

    pub fn manual_barriers(&self) -> &[Arc<ManualBarrierController<T>>] {
        &self.manual_barriers
    }

    pub fn counted_barriers(&self) -> &[Arc<CountedBarrierController<T>>] {
        &self.counted_barriers
    }

    /// Starts orchestration for `input`. Generates a `Uuid` v4 tag when
    /// `tag` is `None`, and retries with a fresh one on `DuplicateId`
    /// (spec.md §6's "caller retries with a fresh id").
    pub async fn push(&self, input: T, tag: Option<String>) -> Result<Job<T>> {
        let passenger = Passenger::new(input);

        let tag = match tag {
            Some(tag) => {
                self.repository
                    .add(JobRecord {
                        tag: tag.clone(),
                        passenger_id: passenger.id(),
                        created_at: SystemTime::now(),
                    })
                    .await?;
                tag
            }
            None => loop {
                let candidate = Uuid::new_v4().to_string();
                match self
                    .repository
                    .add(JobRecord {
                        tag: candidate.clone(),
                        passenger_id: passenger.id(),
                        created_at: SystemTime::now(),
                    })
                    .await
                {
                    Ok(()) => break candidate,
                    Err(BarrierError::DuplicateId(_)) => continue,
                    Err(other) => return Err(other),
                }
            },
        };

        let (tx, rx) = oneshot::channel();
        let orchestrator = self.orchestrator.clone();
        let repository = self.repository.clone();
        let repo_tag = tag.clone();

        self.runtime.spawn(async move {
            let outcome = orchestrator.run(passenger).await;
            repository.remove(&repo_tag).await;
            let _ = tx.send(outcome);
        });

        Ok(Job { tag, outcome: rx })
    }
}
