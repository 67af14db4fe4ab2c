//! Storage Layer Module
//!
//! Provides persistence for job records.
//!
//! This module contains:
//! - The `JobStore` trait with compare-and-set updates
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;
pub use traits::{JobStore, StorageError, StorageResult};
