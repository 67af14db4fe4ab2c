//! Storage Trait Definitions
//!
//! Defines the job repository interface. Implementations can use SQLite
//! (production) or in-memory (testing).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Job;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Version conflict on {job_id}: expected {expected}, found {found}")]
    Conflict {
        job_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Job storage interface
///
/// Writes are compare-and-set on [`Job::version`]: `update` succeeds only
/// when the stored version still equals the version of the copy being
/// written, and the stored copy comes back with the version bumped.
///
/// Implementations:
/// - `SqliteJobStore` - Production storage with SQLite
/// - `MemoryJobStore` - In-memory storage for testing
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Get a job by ID
    async fn get(&self, job_id: &str) -> StorageResult<Option<Job>>;

    /// Insert a new job, returning the stored copy (version 1)
    async fn insert(&self, job: &Job) -> StorageResult<Job>;

    /// Replace a job if its stored version matches `job.version()`
    async fn update(&self, job: &Job) -> StorageResult<Job>;
}
