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

//! The job repository named as an external collaborator in spec.md §6:
//! out of scope for the barrier subsystem itself, sketched here only deeply
//! enough to make `Pipeline::push` exercisable end-to-end.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use transit_common::{BarrierError, Result};

/// Bookkeeping record kept by a [`Repository`] for one in-flight push.
/// Deliberately thin: the pipeline holds the actual result channel, the
/// repository only tracks which tags are in use and when they were created.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub tag: String,
    pub passenger_id: Uuid,
    pub created_at: SystemTime,
}

/// `add` / `remove` / `items` / `clear` / `close`, per spec.md §6. `add`
/// fails with `DuplicateId` when the tag is already in use; callers retry
/// with a fresh tag (see `Pipeline::push`).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn add(&self, record: JobRecord) -> Result<()>;
    async fn remove(&self, tag: &str) -> Option<JobRecord>;
    async fn items(&self) -> Vec<String>;
    async fn clear(&self);
    async fn close(&self);
}

/// An in-memory `Repository` backed by a `tokio::sync::Mutex<HashMap<..>>`,
/// sufficient to drive `Pipeline::push` without any external storage.
#[derive(Default)]
pub struct InMemoryRepository {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn add(&self, record: JobRecord) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&record.tag) {
            return Err(BarrierError::DuplicateId(record.tag));
        }
        jobs.insert(record.tag.clone(), record);
        Ok(())
    }

    async fn remove(&self, tag: &str) -> Option<JobRecord> {
        self.jobs.lock().await.remove(tag)
    }

    async fn items(&self) -> Vec<String> {
        self.jobs.lock().await.keys().cloned().collect()
    }

    async fn clear(&self) {
        self.jobs.lock().await.clear();
    }

    async fn close(&self) {
        self.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_tag_is_rejected() {
        let repo = InMemoryRepository::new();
        let record = JobRecord {
            tag: "job-1".to_string(),
            passenger_id: Uuid::new_v4(),
            created_at: SystemTime::now(),
        };
        repo.add(record.clone()).await.unwrap();
        let err = repo.add(record).await.unwrap_err();
        assert!(matches!(err, BarrierError::DuplicateId(tag) if tag == "job-1"));
    }

    #[tokio::test]
    async fn remove_and_items_reflect_membership() {
        let repo = InMemoryRepository::new();
        repo.add(JobRecord {
            tag: "a".to_string(),
            passenger_id: Uuid::new_v4(),
            created_at: SystemTime::now(),
        })
        .await
        .unwrap();
        assert_eq!(repo.items().await, vec!["a".to_string()]);
        assert!(repo.remove("a").await.is_some());
        assert!(repo.items().await.is_empty());
    }
}
