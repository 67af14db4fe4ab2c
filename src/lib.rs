//! Escrow Jobs - Payment-Gated Job Lifecycle
//!
//! Gates execution of a job behind an on-chain escrow payment. A caller
//! requests work, an invoice is issued, the ledger is polled until funds
//! lock, the job is released to run and its result hash is reported back.
//!
//! ## Components
//!
//! 1. **Hashing** - Canonical input/result hashes and job identifiers
//! 2. **Payment** - Client for the escrow payment service
//! 3. **Poller** - Confirmation polling with a time budget
//! 4. **Storage** - Job persistence (SQLite or in-memory)
//! 5. **Lifecycle** - Job controller and background poll notifier

pub mod common;
pub mod hashing;
pub mod lifecycle;
pub mod payment;
pub mod poller;
pub mod storage;
pub mod types;

// Re-exports: infrastructure
pub use common::{GateConfig, GateError, Network, PaymentServiceConfig, Result};

// Re-exports: hashing
pub use hashing::{input_hash, new_identifier, result_hash, HashError};

// Re-exports: payment protocol
pub use payment::{Invoice, LockResult, PaymentClient, PaymentError, PaymentLedger, PaymentState};

// Re-exports: polling
pub use poller::{classify, Classification, ConfirmationPoller, PollBudget, PollOutcome};

// Re-exports: storage
pub use storage::{JobStore, MemoryJobStore, SqliteJobStore, StorageError};

// Re-exports: lifecycle
pub use lifecycle::{
    run_poll_worker, BackgroundNotifier, CreateJobError, JobController, JobError,
    LifecycleSettings, PollReport, PollRequest,
};

// Re-exports: job types
pub use types::{Job, JobStatus, JobStatusResponse, LedgerTimestamp, Payment, StatusUpdate};
