//! Job Lifecycle Controller
//!
//! Orchestrates a job through its escrow lifecycle:
//! awaiting_payment → running → completed, with failed reachable from any
//! non-terminal state.
//!
//! # Flow:
//! 1. `create_job` issues an invoice, stores the job and queues a poll
//! 2. `poll_and_advance` waits for the ledger to confirm locked funds
//! 3. Business logic runs outside this crate
//! 4. `update_status(completed)` submits the result hash, then persists
//!
//! Every write is a read-modify-write over a copy of the stored job,
//! guarded by the store's version check and retried on conflict.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use super::notifier::{BackgroundNotifier, PollRequest};
use crate::common::config::{GateConfig, DEFAULT_RESULT_WINDOW};
use crate::common::logging::{log_job_event, JOB_TARGET};
use crate::hashing::new_identifier;
use crate::payment::{LockResult, PaymentError, PaymentLedger, PaymentState};
use crate::poller::{ConfirmationPoller, PollBudget, PollOutcome};
use crate::storage::{JobStore, StorageError};
use crate::types::{Job, JobStatus, JobStatusResponse, StatusUpdate, UnknownStatus};

/// Attempts at a compare-and-set write before giving up
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Job lifecycle errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition for {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<UnknownStatus> for JobError {
    fn from(e: UnknownStatus) -> Self {
        JobError::Validation(e.to_string())
    }
}

/// Failed job creation, carrying the identifiers for traceability
#[derive(Debug, Error)]
#[error("job {job_id} for purchaser {purchaser_id} was not created: {source}")]
pub struct CreateJobError {
    pub job_id: String,
    pub purchaser_id: String,
    #[source]
    pub source: JobError,
}

/// Timing knobs for the lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Time the seller has to submit a result after invoicing
    pub result_window: Duration,
    /// Budget for background confirmation polls
    pub budget: PollBudget,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            result_window: DEFAULT_RESULT_WINDOW,
            budget: PollBudget::default(),
        }
    }
}

impl From<&GateConfig> for LifecycleSettings {
    fn from(config: &GateConfig) -> Self {
        Self {
            result_window: config.result_window,
            budget: config.poll.clone(),
        }
    }
}

/// Result of one `poll_and_advance` call
#[derive(Debug, Clone)]
pub struct PollReport {
    /// The job after the call
    pub job: Job,
    /// `None` when no poll ran (job not awaiting payment, or already polled)
    pub outcome: Option<PollOutcome>,
}

impl PollReport {
    fn skipped(job: Job) -> Self {
        Self { job, outcome: None }
    }

    /// Whether this call moved the job to running
    pub fn advanced(&self) -> bool {
        self.job.status() == JobStatus::Running
            && self.outcome.as_ref().map_or(false, PollOutcome::is_success)
    }
}

/// Marks a job as being polled in this process until dropped
struct ActivePoll<'a> {
    polls: &'a Mutex<HashSet<String>>,
    job_id: String,
}

impl Drop for ActivePoll<'_> {
    fn drop(&mut self) {
        let mut polls = self.polls.lock().unwrap_or_else(|e| e.into_inner());
        polls.remove(&self.job_id);
    }
}

/// Drives jobs through invoice, confirmation and completion
pub struct JobController {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn PaymentLedger>,
    notifier: BackgroundNotifier,
    settings: LifecycleSettings,
    active_polls: Mutex<HashSet<String>>,
}

impl JobController {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn PaymentLedger>,
        notifier: BackgroundNotifier,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            settings,
            active_polls: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &dyn PaymentLedger {
        self.ledger.as_ref()
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Issue an invoice and store a job awaiting payment
    ///
    /// A poll request is queued exactly once whether or not creation
    /// succeeds. Nothing is stored on failure.
    pub async fn create_job(&self, purchaser_id: &str, input: Value) -> Result<Job, CreateJobError> {
        let purchaser_id = if purchaser_id.is_empty() {
            new_identifier()
        } else {
            purchaser_id.to_string()
        };
        let job_id = new_identifier();

        let created = self.issue_and_store(&job_id, &purchaser_id, input).await;

        match created {
            Ok(job) => {
                log_job_event("job_created", &job_id, job.status().as_str(), true, None);
                self.notifier.fire(PollRequest::with_job(job.clone()));
                Ok(job)
            }
            Err(source) => {
                log_job_event(
                    "job_creation_failed",
                    &job_id,
                    JobStatus::Pending.as_str(),
                    false,
                    Some(&source.to_string()),
                );
                self.notifier.fire(PollRequest::new(job_id.clone()));
                Err(CreateJobError {
                    job_id,
                    purchaser_id,
                    source,
                })
            }
        }
    }

    async fn issue_and_store(
        &self,
        job_id: &str,
        purchaser_id: &str,
        input: Value,
    ) -> Result<Job, JobError> {
        if input.is_null() {
            return Err(JobError::Validation("input is required".to_string()));
        }

        let invoice = self
            .ledger
            .create_invoice(
                purchaser_id,
                &input,
                self.settings.result_window,
                Some(format!("job_id={}", job_id)),
            )
            .await?;

        let job = Job::awaiting_payment(
            job_id.to_string(),
            purchaser_id.to_string(),
            input,
            invoice.payment,
        );

        Ok(self.store.insert(&job).await?)
    }

    /// Wait for funds to lock and move the job to running
    ///
    /// A job that is not awaiting payment, or that is already being polled
    /// by this process, is returned unchanged without polling. Ledger errors
    /// and timeouts leave the job awaiting payment.
    pub async fn poll_and_advance(
        &self,
        job_id: &str,
        budget: &PollBudget,
    ) -> Result<PollReport, JobError> {
        let job = self.get_job(job_id).await?;
        self.advance(job, budget).await
    }

    /// Entry point for queued poll requests
    pub async fn handle_poll_request(&self, request: PollRequest) -> Result<PollReport, JobError> {
        let job = match request.job {
            Some(job) => job,
            None => self.get_job(&request.job_id).await?,
        };
        self.advance(job, &self.settings.budget).await
    }

    async fn advance(&self, job: Job, budget: &PollBudget) -> Result<PollReport, JobError> {
        if job.status() != JobStatus::AwaitingPayment {
            return Ok(PollReport::skipped(job));
        }

        let _active = match self.begin_poll(job.job_id()) {
            Some(active) => active,
            None => {
                tracing::debug!(target: JOB_TARGET, job_id = job.job_id(), "poll already active");
                return Ok(PollReport::skipped(job));
            }
        };

        let blockchain_identifier = job
            .blockchain_identifier()
            .ok_or_else(|| JobError::Validation(format!("job {} has no payment", job.job_id())))?
            .to_string();

        let ledger = self.ledger.as_ref();
        let bid = blockchain_identifier.as_str();
        let outcome = ConfirmationPoller::new(budget.clone())
            .run(bid, move || ledger.query_status(bid))
            .await;

        if !outcome.is_success() {
            tracing::warn!(
                target: JOB_TARGET,
                job_id = job.job_id(),
                blockchain_identifier = bid,
                outcome = %outcome,
                "payment not confirmed, job left awaiting payment"
            );
            let current = self.get_job(job.job_id()).await?;
            return Ok(PollReport {
                job: current,
                outcome: Some(outcome),
            });
        }

        let job = match self
            .transition(job.job_id(), &StatusUpdate::new(JobStatus::Running))
            .await
        {
            Ok(job) => {
                log_job_event("funds_locked", job.job_id(), job.status().as_str(), true, None);
                job
            }
            // Moved on (e.g. failed) while we were polling
            Err(JobError::InvalidTransition { .. }) => self.get_job(job.job_id()).await?,
            Err(e) => return Err(e),
        };

        Ok(PollReport {
            job,
            outcome: Some(outcome),
        })
    }

    fn begin_poll(&self, job_id: &str) -> Option<ActivePoll<'_>> {
        let mut polls = self.active_polls.lock().unwrap_or_else(|e| e.into_inner());
        if !polls.insert(job_id.to_string()) {
            return None;
        }
        Some(ActivePoll {
            polls: &self.active_polls,
            job_id: job_id.to_string(),
        })
    }

    /// Apply an explicit status change
    ///
    /// Completing requires a result. When `ledger` is given, the result hash
    /// is submitted before anything is persisted, and a failed submission
    /// fails the whole update. A concurrent writer may still end the job
    /// between submission and the write; that divergence is logged as
    /// `result_submitted_not_persisted` and the transition error returned.
    pub async fn update_status(
        &self,
        job_id: &str,
        update: StatusUpdate,
        ledger: Option<&dyn PaymentLedger>,
    ) -> Result<Job, JobError> {
        let job = self.get_job(job_id).await?;

        validate_update(&update)?;
        check_transition(&job, update.status)?;

        let mut submitted = false;
        if let (JobStatus::Completed, Some(ledger)) = (update.status, ledger) {
            let bid = job.blockchain_identifier().ok_or_else(|| {
                JobError::Validation(format!("job {} has no payment to settle", job_id))
            })?;
            let result = update.result.as_ref().unwrap_or(&Value::Null);

            if let Err(e) = ledger.submit_result(bid, job.purchaser_id(), result).await {
                log_job_event(
                    "result_submission_failed",
                    job_id,
                    job.status().as_str(),
                    false,
                    Some(&e.to_string()),
                );
                return Err(e.into());
            }
            submitted = true;
        }

        let updated = match self.transition(job_id, &update).await {
            Ok(job) => job,
            Err(e) => {
                if submitted {
                    log_job_event(
                        "result_submitted_not_persisted",
                        job_id,
                        job.status().as_str(),
                        false,
                        Some(&e.to_string()),
                    );
                }
                return Err(e);
            }
        };
        log_job_event("status_updated", job_id, updated.status().as_str(), true, None);
        Ok(updated)
    }

    /// Compare-and-set write, reloading on version conflicts
    async fn transition(&self, job_id: &str, update: &StatusUpdate) -> Result<Job, JobError> {
        let mut last_conflict = None;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut job = self.get_job(job_id).await?;
            check_transition(&job, update.status)?;
            job.apply(update);

            match self.store.update(&job).await {
                Ok(stored) => return Ok(stored),
                Err(e @ StorageError::Conflict { .. }) => {
                    tracing::debug!(target: JOB_TARGET, job_id, error = %e, "write conflict, retrying");
                    last_conflict = Some(e);
                }
                Err(StorageError::NotFound(id)) => return Err(JobError::NotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_conflict
            .map(JobError::Storage)
            .unwrap_or_else(|| JobError::NotFound(job_id.to_string())))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, JobError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Status view for the `status` boundary call
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, JobError> {
        Ok(JobStatusResponse::from(&self.get_job(job_id).await?))
    }

    /// Commit purchaser funds against the job's invoice
    pub async fn lock_funds(&self, job_id: &str) -> Result<LockResult, JobError> {
        let job = self.get_job(job_id).await?;
        let payment = job
            .payment()
            .ok_or_else(|| JobError::Validation(format!("job {} has no payment", job_id)))?;

        Ok(self.ledger.lock_funds(payment, job.purchaser_id()).await?)
    }

    /// Purchaser-side ledger view of the job's escrow
    pub async fn purchase_state(&self, job_id: &str) -> Result<Option<PaymentState>, JobError> {
        let job = self.get_job(job_id).await?;
        let bid = job
            .blockchain_identifier()
            .ok_or_else(|| JobError::Validation(format!("job {} has no payment", job_id)))?;

        Ok(self.ledger.query_purchase_status(bid).await?)
    }
}

fn validate_update(update: &StatusUpdate) -> Result<(), JobError> {
    match update.status {
        JobStatus::Completed if update.result.as_ref().map_or(true, Value::is_null) => Err(
            JobError::Validation("completed status requires a result".to_string()),
        ),
        JobStatus::Failed if update.message.as_deref().map_or(true, str::is_empty) => Err(
            JobError::Validation("failed status requires an error message".to_string()),
        ),
        _ => Ok(()),
    }
}

fn check_transition(job: &Job, next: JobStatus) -> Result<(), JobError> {
    if job.status().can_transition_to(next) {
        Ok(())
    } else {
        Err(JobError::InvalidTransition {
            job_id: job.job_id().to_string(),
            from: job.status(),
            to: next,
        })
    }
}
