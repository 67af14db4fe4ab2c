//! In-Memory Storage Implementation
//!
//! Provides in-memory job storage for testing and development.
//! Data is lost when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{JobStore, StorageError, StorageResult};
use crate::types::Job;

/// In-memory job store
///
/// Uses Arc<RwLock<>> for concurrent access; clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Read a job from synchronous test code
    #[cfg(test)]
    pub(crate) fn try_snapshot(&self, job_id: &str) -> Option<Job> {
        self.jobs.try_read().ok()?.get(job_id).cloned()
    }

    /// Overwrite a job from synchronous test code, bumping its version
    #[cfg(test)]
    pub(crate) fn try_replace(&self, mut job: Job) -> bool {
        match self.jobs.try_write() {
            Ok(mut jobs) => {
                job.version += 1;
                jobs.insert(job.job_id.clone(), job);
                true
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: &str) -> StorageResult<Option<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(job_id).cloned())
    }

    async fn insert(&self, job: &Job) -> StorageResult<Job> {
        let mut jobs = self.jobs.write().await;

        if jobs.contains_key(job.job_id()) {
            return Err(StorageError::Duplicate(job.job_id().to_string()));
        }

        let mut stored = job.clone();
        stored.version = 1;
        jobs.insert(stored.job_id.clone(), stored.clone());

        Ok(stored)
    }

    async fn update(&self, job: &Job) -> StorageResult<Job> {
        let mut jobs = self.jobs.write().await;

        let current = jobs
            .get(job.job_id())
            .ok_or_else(|| StorageError::NotFound(job.job_id().to_string()))?;

        if current.version != job.version {
            return Err(StorageError::Conflict {
                job_id: job.job_id.clone(),
                expected: job.version,
                found: current.version,
            });
        }

        let mut stored = job.clone();
        stored.version = job.version + 1;
        jobs.insert(stored.job_id.clone(), stored.clone());

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::fixtures;
    use crate::types::{JobStatus, StatusUpdate};

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryJobStore::new();
        let job = fixtures::job("00aa11bb22cc33");

        let stored = store.insert(&job).await.unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(store.len().await, 1);

        let fetched = store.get("00aa11bb22cc33").await.unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryJobStore::new();
        let job = fixtures::job("00aa11bb22cc33");

        store.insert(&job).await.unwrap();
        let result = store.insert(&job).await;
        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryJobStore::new();
        let mut copy = store.insert(&fixtures::job("00aa11bb22cc33")).await.unwrap();

        copy.apply(&StatusUpdate::new(JobStatus::Running));
        let stored = store.update(&copy).await.unwrap();

        assert_eq!(stored.version(), 2);
        assert_eq!(stored.status(), JobStatus::Running);
        assert_eq!(store.get("00aa11bb22cc33").await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryJobStore::new();
        let stored = store.insert(&fixtures::job("00aa11bb22cc33")).await.unwrap();

        let mut first = stored.clone();
        let mut second = stored;
        first.apply(&StatusUpdate::new(JobStatus::Running));
        second.apply(&StatusUpdate::failed("cancelled"));

        store.update(&first).await.unwrap();
        let result = store.update(&second).await;
        assert!(matches!(
            result,
            Err(StorageError::Conflict { expected: 1, found: 2, .. })
        ));

        let current = store.get("00aa11bb22cc33").await.unwrap().unwrap();
        assert_eq!(current.status(), JobStatus::Running);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryJobStore::new();
        let result = store.update(&fixtures::job("00aa11bb22cc33")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(store.is_empty().await);
    }
}
