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

//! The orchestrator↔barrier contract (spec.md §4.5) and the external
//! collaborators (§6) needed to exercise it end-to-end: a job repository,
//! a logger, and the `Pipeline<T>` surface used to push work in.

mod logger;
mod orchestrator;
mod pipeline;
mod repository;
mod step;

pub use logger::{Logger, TracingLogger};
pub use orchestrator::{OrchestratorConfig, PipelineOrchestrator, PipelineOutcome};
pub use pipeline::{Job, Pipeline};
pub use repository::{InMemoryRepository, JobRecord, Repository};
pub use step::{StepDescriptor, StepOperation, Transform};
pub use transit_common::{BarrierError, Result};
