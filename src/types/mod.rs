//! Shared Types
//!
//! Domain types used across the lifecycle controller, stores and the
//! payment client.

pub mod job;

// Re-exports for convenience
pub use job::{
    Job, JobStatus, JobStatusResponse, LedgerTimestamp, Payment, StatusUpdate, UnknownStatus,
};
