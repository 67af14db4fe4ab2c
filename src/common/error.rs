//! Common Error Types
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

use crate::hashing::HashError;
use crate::lifecycle::{CreateJobError, JobError};
use crate::payment::PaymentError;
use crate::poller::PollOutcome;
use crate::storage::StorageError;

/// Root error type for the escrow job engine
#[derive(Debug, Error)]
pub enum GateError {
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    #[error("encoding error: {0}")]
    Hash(#[from] HashError),

    #[error("payment service error: {0}")]
    Payment(#[from] PaymentError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("job error: {0}")]
    Job(#[from] JobError),

    #[error("{0}")]
    CreateJob(#[from] CreateJobError),

    /// Poll budget exhausted without a terminal state
    #[error("payment for job {job_id} not confirmed in time (last state: {last_state})")]
    Timeout { job_id: String, last_state: String },

    /// Ledger reported one of its error states
    #[error("ledger rejected payment for job {job_id}: {state}")]
    TerminalLedger { job_id: String, state: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Error for a poll that did not confirm, `None` on success
    pub fn from_poll_outcome(job_id: &str, outcome: &PollOutcome) -> Option<Self> {
        match outcome {
            PollOutcome::Confirmed { .. } => None,
            PollOutcome::LedgerError { .. } => Some(Self::TerminalLedger {
                job_id: job_id.to_string(),
                state: outcome.on_chain_state().unwrap_or("unknown").to_string(),
            }),
            PollOutcome::TimedOut { .. } => Some(Self::Timeout {
                job_id: job_id.to_string(),
                last_state: outcome.on_chain_state().unwrap_or("not found").to_string(),
            }),
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            GateError::Payment(e) => e.is_retryable(),
            GateError::Job(JobError::Payment(e)) => e.is_retryable(),
            GateError::CreateJob(e) => matches!(&e.source, JobError::Payment(p) if p.is_retryable()),
            GateError::Storage(StorageError::Conflict { .. } | StorageError::Connection(_)) => true,
            GateError::Timeout { .. } | GateError::Io(_) => true,
            _ => false,
        }
    }

    /// Get a stable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            GateError::Config(_) => "CONFIG_ERROR",
            GateError::Logging(_) => "LOGGING_ERROR",
            GateError::Hash(_) => "ENCODING_ERROR",
            GateError::Payment(e) => payment_code(e),
            GateError::Storage(_) => "STORAGE_ERROR",
            GateError::Job(e) => job_code(e),
            GateError::CreateJob(e) => job_code(&e.source),
            GateError::Timeout { .. } => "TIMEOUT",
            GateError::TerminalLedger { .. } => "TERMINAL_LEDGER_ERROR",
            GateError::Validation(_) => "VALIDATION_ERROR",
            GateError::Io(_) => "IO_ERROR",
        }
    }
}

fn payment_code(e: &PaymentError) -> &'static str {
    match e {
        PaymentError::Network(_) => "NETWORK_ERROR",
        PaymentError::Upstream { .. } => "UPSTREAM_ERROR",
        PaymentError::InvalidResponse(_) => "INVALID_RESPONSE",
        PaymentError::Hash(_) => "ENCODING_ERROR",
        PaymentError::MissingConfig(_) => "CONFIG_ERROR",
    }
}

fn job_code(e: &JobError) -> &'static str {
    match e {
        JobError::NotFound(_) => "NOT_FOUND",
        JobError::Validation(_) | JobError::InvalidTransition { .. } => "VALIDATION_ERROR",
        JobError::Payment(p) => payment_code(p),
        JobError::Storage(_) => "STORAGE_ERROR",
    }
}

/// Result type alias using GateError
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentState;
    use serde_json::json;
    use std::time::Duration;

    fn upstream(status: u16) -> PaymentError {
        PaymentError::Upstream {
            status,
            body: "err".to_string(),
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GateError::validation("bad").error_code(), "VALIDATION_ERROR");
        assert_eq!(GateError::from(upstream(500)).error_code(), "UPSTREAM_ERROR");
        assert_eq!(
            GateError::from(JobError::NotFound("x".to_string())).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            GateError::from(JobError::Payment(upstream(502))).error_code(),
            "UPSTREAM_ERROR"
        );
        assert_eq!(
            GateError::from(HashError::Encoding("cycle".to_string())).error_code(),
            "ENCODING_ERROR"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GateError::from(upstream(503)).is_retryable());
        assert!(!GateError::validation("invalid input").is_retryable());
        assert!(!GateError::from(JobError::NotFound("x".to_string())).is_retryable());

        let create = CreateJobError {
            job_id: "00aa11bb22cc33".to_string(),
            purchaser_id: "user1".to_string(),
            source: JobError::Payment(upstream(500)),
        };
        let err = GateError::from(create);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("00aa11bb22cc33"));
    }

    #[test]
    fn test_poll_outcome_mapping() {
        let state = PaymentState {
            blockchain_identifier: "chain_1".to_string(),
            on_chain_state: Some("Disputed".to_string()),
            raw: json!({}),
        };

        let rejected = PollOutcome::LedgerError {
            state: state.clone(),
            attempts: 2,
        };
        let err = GateError::from_poll_outcome("job1", &rejected).unwrap();
        assert_eq!(err.error_code(), "TERMINAL_LEDGER_ERROR");
        assert!(err.to_string().contains("Disputed"));

        let timed_out = PollOutcome::TimedOut {
            last_state: None,
            attempts: 60,
            elapsed: Duration::from_secs(600),
        };
        let err = GateError::from_poll_outcome("job1", &timed_out).unwrap();
        assert_eq!(err.error_code(), "TIMEOUT");
        assert!(err.to_string().contains("not found"));

        let confirmed = PollOutcome::Confirmed { state, attempts: 1 };
        assert!(GateError::from_poll_outcome("job1", &confirmed).is_none());
    }
}
