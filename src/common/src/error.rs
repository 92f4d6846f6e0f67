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

use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error taxonomy for the barrier subsystem and its pipeline contract.
///
/// Every variant here is a programmer error except the expected terminal
/// outcome of an `invoke` racing an `interrupt` (which resolves to `Ok(None)`,
/// not an error).
#[derive(Error, Debug)]
pub enum BarrierError {
    #[error("barrier already invoked")]
    AlreadyInvoked,

    #[error("barrier already registered with this controller")]
    DuplicateRegistration,

    #[error("barrier is not registered with this controller")]
    UnknownBarrier,

    #[error("barrier already arrived at this controller")]
    DoubleBlock,

    #[error("registering this barrier would exceed capacity {capacity}")]
    CapacityExceeded { capacity: usize },

    #[error("requested capacity {requested} is below the {registered} barriers already registered")]
    CapacityBelowRegistered { requested: usize, registered: usize },

    #[error("aggregate action returned {got} results for {expected} inputs")]
    BadAggregatorOutput { expected: usize, got: usize },

    #[error("aggregate action failed: {0}")]
    AggregateFailed(#[source] BoxedError),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("job tag {0:?} is already in use")]
    DuplicateId(String),

    /// A cause shared by reference count across every barrier in one
    /// `CountedBarrierController` aggregation batch. Used so a
    /// `BadAggregatorOutput`/`AggregateFailed` raised by one arrival's
    /// aggregation phase is observed, as the identical cause, by every
    /// other barrier blocked in the same batch (spec.md §7: "the exception
    /// propagates to every waiting arrival; each sees the same cause").
    #[error("{0}")]
    Shared(Arc<BarrierError>),
}

impl BarrierError {
    /// The underlying cause, unwrapping one level of [`BarrierError::Shared`]
    /// if present. Lets callers (and tests) pattern-match the original
    /// variant without caring whether they received it directly or as part
    /// of a shared aggregation-failure batch.
    pub fn cause(&self) -> &BarrierError {
        match self {
            BarrierError::Shared(inner) => inner,
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, BarrierError>;

/// Util macro for generating an [`BarrierError::InternalInvariant`] when a
/// condition check fails. Mirrors the teacher's `ensure!`/`bail!` pair, scoped
/// down to the one error kind that this crate's invariants raise.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        if !$cond {
            return Err($crate::error::BarrierError::InternalInvariant(format!($fmt $(, $arg)*)));
        }
    };
}
