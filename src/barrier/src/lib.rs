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

//! The barrier subsystem: a single-use suspend-until-lifted rendezvous
//! (`Barrier<T>`) and the two controllers that decide when groups of
//! barriers get lifted (`ManualBarrierController`, `CountedBarrierController`).

mod barrier;
mod controller;
mod counted;
mod manual;
mod sort_replayer;

pub use barrier::{Barrier, BarrierId};
pub use controller::BarrierController;
pub use counted::{AggregateAction, CountedBarrierController};
pub use manual::ManualBarrierController;
pub use sort_replayer::SortReplayer;
pub use transit_common::error;
pub use transit_common::{ensure, BarrierError, Result};
