//! Job Types
//!
//! A job is the unit of gated work. Its status moves through:
//!
//! ```text
//! pending → awaiting_payment → running → completed
//!                  │              │
//!                  └────→ failed ←┘
//! ```
//!
//! `awaiting_input` is only entered on an explicit external signal while a
//! job is running. Records are never mutated in place by callers: the
//! lifecycle controller loads a copy, applies a transition and writes the
//! copy back.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Status of a job through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, no invoice yet
    Pending,
    /// Invoice issued, waiting for funds to lock on-chain
    AwaitingPayment,
    /// Paused on an external request for more input
    AwaitingInput,
    /// Funds confirmed, business logic may run
    Running,
    /// Result produced
    Completed,
    /// Error occurred
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status string
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "awaiting_input" => Ok(Self::AwaitingInput),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl JobStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingPayment => "awaiting_payment",
            Self::AwaitingInput => "awaiting_input",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// No transitions leave a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::AwaitingPayment => 1,
            Self::AwaitingInput => 2,
            Self::Running => 3,
            Self::Completed | Self::Failed => 4,
        }
    }

    /// Check whether `next` may follow this status
    ///
    /// Transitions only move forward, with three exceptions: `failed` is
    /// reachable from any non-terminal status, `running` and
    /// `awaiting_input` may alternate, and `completed` requires `running`.
    /// Re-asserting the current non-terminal status is allowed.
    ///
    /// `running → awaiting_input` is the one backward edge: a running job
    /// pauses there until the caller supplies more input, then resumes.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (*self, next) {
            (_, Self::Failed) => true,
            (Self::Running, Self::Completed) => true,
            (_, Self::Completed) => false,
            (Self::Running, Self::AwaitingInput) => true,
            (current, next) => current == next || next.rank() > current.rank(),
        }
    }
}

/// Timestamp issued by the payment service
///
/// The service signs over the exact textual form it returned, which may be
/// a JSON number or a string. The original text is kept and always
/// re-serialised as a string; it is never parsed or reformatted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerTimestamp(String);

impl LedgerTimestamp {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LedgerTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for LedgerTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for LedgerTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // `arbitrary_precision` numbers render back to their source token
        match Value::deserialize(deserializer)? {
            Value::String(text) => Ok(Self(text)),
            Value::Number(number) => Ok(Self(number.to_string())),
            other => Err(D::Error::custom(format!(
                "timestamp must be a string or number, got {}",
                other
            ))),
        }
    }
}

/// Escrow invoice attached to a job
///
/// Every value here comes from the payment service's signed commitment and
/// must be echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// On-chain escrow reference, the join key to ledger state
    pub blockchain_identifier: String,
    pub pay_by_time: LedgerTimestamp,
    pub submit_result_time: LedgerTimestamp,
    pub unlock_time: LedgerTimestamp,
    pub external_dispute_unlock_time: LedgerTimestamp,
    /// SHA256 binding of (purchaser, input)
    pub input_hash: String,
}

/// Requested status change
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub result: Option<Value>,
    pub message: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            message: None,
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: JobStatus::Completed,
            result: Some(result),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            message: Some(message.into()),
        }
    }
}

/// A job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub(crate) job_id: String,
    pub(crate) purchaser_id: String,
    pub(crate) input: Value,
    pub(crate) status: JobStatus,
    pub(crate) payment: Option<Payment>,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
    /// Unix milliseconds
    pub(crate) created_at: u64,
    /// Unix milliseconds, refreshed on every mutation
    pub(crate) updated_at: u64,
    /// Optimistic concurrency token, owned by the store
    #[serde(default)]
    pub(crate) version: u64,
}

impl Job {
    /// Create a job whose invoice has just been issued
    pub(crate) fn awaiting_payment(
        job_id: String,
        purchaser_id: String,
        input: Value,
        payment: Payment,
    ) -> Self {
        let now = now_millis();

        Self {
            job_id,
            purchaser_id,
            input,
            status: JobStatus::AwaitingPayment,
            payment: Some(payment),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn purchaser_id(&self) -> &str {
        &self.purchaser_id
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn payment(&self) -> Option<&Payment> {
        self.payment.as_ref()
    }

    pub fn blockchain_identifier(&self) -> Option<&str> {
        self.payment.as_ref().map(|p| p.blockchain_identifier.as_str())
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Apply a validated status update to this copy
    pub(crate) fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        match update.status {
            JobStatus::Completed => self.result = update.result.clone(),
            JobStatus::Failed => self.error = update.message.clone(),
            _ => {}
        }
        self.touch();
    }

    fn touch(&mut self) {
        // Keep updated_at strictly increasing within the same millisecond
        self.updated_at = now_millis().max(self.updated_at + 1);
    }
}

/// Response shape of the `status` boundary call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            result: job.result.clone(),
            message: job.error.clone(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn payment(blockchain_identifier: &str) -> Payment {
        Payment {
            blockchain_identifier: blockchain_identifier.to_string(),
            pay_by_time: LedgerTimestamp::new("1736942400000"),
            submit_result_time: LedgerTimestamp::new("1736943300000"),
            unlock_time: LedgerTimestamp::new("1736964900000"),
            external_dispute_unlock_time: LedgerTimestamp::new("1736986500000"),
            input_hash: "ab".repeat(32),
        }
    }

    pub fn job(job_id: &str) -> Job {
        Job::awaiting_payment(
            job_id.to_string(),
            "user1".to_string(),
            serde_json::json!({"prompt": "hi"}),
            payment(&format!("chain_{}", job_id)),
        )
    }
}
