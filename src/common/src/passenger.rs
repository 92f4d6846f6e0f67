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

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use uuid::Uuid;

/// An in-flight work item threaded through a pipeline.
///
/// `Passenger<T>` wraps an opaque payload `T` with an identity (a UUID) and a
/// creation timestamp. It is ordered and compared by identity only: two
/// passengers with equal `data` but different ids are never equal, and the
/// relative order of their `data` never enters into it. This is what lets
/// [`crate::BarrierError`]-producing code require `T: Ord` on the *passenger*
/// level without imposing any trait bound on the caller's payload type.
#[derive(Debug, Clone)]
pub struct Passenger<T> {
    id: Uuid,
    created_at: SystemTime,
    data: T,
}

impl<T> Passenger<T> {
    pub fn new(data: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: SystemTime::now(),
            data,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Returns a copy of this passenger carrying `data` in place of the
    /// original payload, keeping the same identity and creation time.
    pub fn with(&self, data: T) -> Self {
        Self {
            id: self.id,
            created_at: self.created_at,
            data,
        }
    }
}

impl<T> PartialEq for Passenger<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Passenger<T> {}

impl<T> PartialOrd for Passenger<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Passenger<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for Passenger<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
