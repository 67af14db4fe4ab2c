//! SQLite Persistent Storage for Jobs
//!
//! Provides durable job storage that survives process restarts.
//! Uses connection pooling via r2d2 for concurrent access. Each job is kept
//! as a JSON document next to the columns needed for the version check.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{JobStore, StorageError, StorageResult};
use crate::types::Job;

/// SQLite-backed job store with connection pooling
pub struct SqliteJobStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteJobStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                purchaser_id TEXT NOT NULL,
                status TEXT NOT NULL,
                blockchain_identifier TEXT,
                body TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_blockchain_identifier ON jobs(blockchain_identifier);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn encode(job: &Job) -> Result<String, StorageError> {
        serde_json::to_string(job).map_err(|e| StorageError::InvalidData(e.to_string()))
    }

    fn decode(body: &str, version: i64) -> Result<Job, StorageError> {
        let mut job: Job =
            serde_json::from_str(body).map_err(|e| StorageError::InvalidData(e.to_string()))?;
        // The column is authoritative for the version
        job.version = version as u64;
        Ok(job)
    }

    // Synchronous helper methods for the trait implementations

    fn get_sync(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        let conn = self.conn()?;

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT body, version FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(|(body, version)| Self::decode(&body, version))
            .transpose()
    }

    fn insert_sync(&self, job: &Job) -> Result<Job, StorageError> {
        let conn = self.conn()?;

        let mut stored = job.clone();
        stored.version = 1;

        conn.execute(
            r#"
            INSERT INTO jobs (
                job_id, purchaser_id, status, blockchain_identifier,
                body, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                stored.job_id(),
                stored.purchaser_id(),
                stored.status().to_string(),
                stored.blockchain_identifier(),
                Self::encode(&stored)?,
                stored.version() as i64,
                stored.created_at() as i64,
                stored.updated_at() as i64,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(job.job_id().to_string());
                }
            }
            StorageError::Database(e.to_string())
        })?;

        Ok(stored)
    }

    fn update_sync(&self, job: &Job) -> Result<Job, StorageError> {
        let conn = self.conn()?;

        let mut stored = job.clone();
        stored.version = job.version() + 1;

        let rows_affected = conn
            .execute(
                r#"
            UPDATE jobs SET
                status = ?2,
                blockchain_identifier = ?3,
                body = ?4,
                version = ?5,
                updated_at = ?6
            WHERE job_id = ?1 AND version = ?7
            "#,
                params![
                    stored.job_id(),
                    stored.status().to_string(),
                    stored.blockchain_identifier(),
                    Self::encode(&stored)?,
                    stored.version() as i64,
                    stored.updated_at() as i64,
                    job.version() as i64,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 0 {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT version FROM jobs WHERE job_id = ?1",
                    params![job.job_id()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StorageError::Database(e.to_string()))?;

            return Err(match found {
                Some(found) => StorageError::Conflict {
                    job_id: job.job_id().to_string(),
                    expected: job.version(),
                    found: found as u64,
                },
                None => StorageError::NotFound(job.job_id().to_string()),
            });
        }

        Ok(stored)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, job_id: &str) -> StorageResult<Option<Job>> {
        self.get_sync(job_id)
    }

    async fn insert(&self, job: &Job) -> StorageResult<Job> {
        self.insert_sync(job)
    }

    async fn update(&self, job: &Job) -> StorageResult<Job> {
        self.update_sync(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::fixtures;
    use crate::types::{JobStatus, StatusUpdate};
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = fixtures::job("00aa11bb22cc33");

        let stored = store.insert(&job).await.unwrap();
        assert_eq!(stored.version(), 1);

        let fetched = store.get("00aa11bb22cc33").await.unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert_eq!(fetched.blockchain_identifier(), Some("chain_00aa11bb22cc33"));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = fixtures::job("00aa11bb22cc33");

        store.insert(&job).await.unwrap();
        let result = store.insert(&job).await;
        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_update_compare_and_set() {
        let store = SqliteJobStore::in_memory().unwrap();
        let stored = store.insert(&fixtures::job("00aa11bb22cc33")).await.unwrap();

        let mut running = stored.clone();
        running.apply(&StatusUpdate::new(JobStatus::Running));
        let running = store.update(&running).await.unwrap();
        assert_eq!(running.version(), 2);

        let mut stale = stored;
        stale.apply(&StatusUpdate::failed("late"));
        let result = store.update(&stale).await;
        assert!(matches!(
            result,
            Err(StorageError::Conflict { expected: 1, found: 2, .. })
        ));

        let mut completed = running;
        completed.apply(&StatusUpdate::completed(json!({"text": "done"})));
        store.update(&completed).await.unwrap();

        let fetched = store.get("00aa11bb22cc33").await.unwrap().unwrap();
        assert_eq!(fetched.status(), JobStatus::Completed);
        assert_eq!(fetched.result(), Some(&json!({"text": "done"})));
        assert_eq!(fetched.version(), 3);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = SqliteJobStore::in_memory().unwrap();
        let result = store.update(&fixtures::job("00aa11bb22cc33")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_payment_timestamps_survive_storage() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = fixtures::job("00aa11bb22cc33");
        let expected = job.payment().cloned();

        store.insert(&job).await.unwrap();
        let fetched = store.get("00aa11bb22cc33").await.unwrap().unwrap();
        assert_eq!(fetched.payment().cloned(), expected);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = std::env::temp_dir().join(format!("escrow-jobs-test-{}", crate::hashing::new_identifier()));
        let path = dir.join("jobs.db");

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = SqliteJobStore::new(&path).unwrap();
            store.insert(&fixtures::job("00aa11bb22cc33")).await.unwrap();
        });
        runtime.block_on(async {
            let store = SqliteJobStore::new(&path).unwrap();
            assert!(store.get("00aa11bb22cc33").await.unwrap().is_some());
        });

        std::fs::remove_dir_all(dir).ok();
    }
}
