//! Confirmation Poller
//!
//! Repeatedly queries the payment service for an invoice's on-chain state
//! until a terminal state shows up or the time budget runs out.
//!
//! | Observed state                                      | Classification   |
//! |-----------------------------------------------------|------------------|
//! | `FundsLocked`, `ResultSubmitted`, `Withdrawn`       | success          |
//! | `FundsOrDatumInvalid`, `RefundRequested`, `Disputed`, `RefundWithdrawn`, `DisputedWithdrawn` | error |
//! | absent, null or anything else                       | pending          |
//!
//! The poller owns no I/O: callers inject the query function, and all
//! waiting goes through `tokio::time`, so tests can drive it with a paused
//! clock.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::common::logging::log_poll_event;
use crate::payment::{PaymentError, PaymentState};

/// States that confirm the escrow is funded (or already settled)
pub const SUCCESS_STATES: [&str; 3] = ["FundsLocked", "ResultSubmitted", "Withdrawn"];

/// States that end the escrow without a usable payment
pub const ERROR_STATES: [&str; 5] = [
    "FundsOrDatumInvalid",
    "RefundRequested",
    "Disputed",
    "RefundWithdrawn",
    "DisputedWithdrawn",
];

/// Bounds for the wait before the first query (ledger indexing lag)
pub const MIN_INITIAL_DELAY: Duration = Duration::from_secs(2);
pub const MAX_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Classification of an observed on-chain state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Error,
    Pending,
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Classification::Pending)
    }
}

/// Classify an on-chain state (case-sensitive)
pub fn classify(state: Option<&str>) -> Classification {
    match state {
        Some(s) if SUCCESS_STATES.contains(&s) => Classification::Success,
        Some(s) if ERROR_STATES.contains(&s) => Classification::Error,
        _ => Classification::Pending,
    }
}

/// Time budget for one polling run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollBudget {
    pub fn new(interval_secs: u64, timeout_minutes: u64) -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_minutes.saturating_mul(60)),
        }
    }

    /// Set the initial delay, clamped to 2-5 seconds
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay.clamp(MIN_INITIAL_DELAY, MAX_INITIAL_DELAY);
        self
    }
}

impl Default for PollBudget {
    fn default() -> Self {
        Self::new(10, 10)
    }
}

/// Result of a polling run
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Funds locked (or the escrow was already processed)
    Confirmed { state: PaymentState, attempts: u32 },
    /// The escrow reached a terminal error state
    LedgerError { state: PaymentState, attempts: u32 },
    /// Budget exhausted; carries the last state actually observed
    TimedOut {
        last_state: Option<PaymentState>,
        attempts: u32,
        elapsed: Duration,
    },
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Confirmed { .. })
    }

    pub fn classification(&self) -> Classification {
        match self {
            PollOutcome::Confirmed { .. } => Classification::Success,
            PollOutcome::LedgerError { .. } => Classification::Error,
            PollOutcome::TimedOut { .. } => Classification::Pending,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Confirmed { attempts, .. }
            | PollOutcome::LedgerError { attempts, .. }
            | PollOutcome::TimedOut { attempts, .. } => *attempts,
        }
    }

    /// Last state seen on-chain, if any
    pub fn state(&self) -> Option<&PaymentState> {
        match self {
            PollOutcome::Confirmed { state, .. } | PollOutcome::LedgerError { state, .. } => {
                Some(state)
            }
            PollOutcome::TimedOut { last_state, .. } => last_state.as_ref(),
        }
    }

    /// On-chain state name for logs and reports
    pub fn on_chain_state(&self) -> Option<&str> {
        self.state().and_then(|s| s.on_chain_state.as_deref())
    }
}

impl std::fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollOutcome::Confirmed { attempts, .. } => write!(
                f,
                "confirmed ({}) after {} queries",
                self.on_chain_state().unwrap_or("unknown"),
                attempts
            ),
            PollOutcome::LedgerError { attempts, .. } => write!(
                f,
                "ledger error ({}) after {} queries",
                self.on_chain_state().unwrap_or("unknown"),
                attempts
            ),
            PollOutcome::TimedOut {
                last_state,
                attempts,
                elapsed,
            } => match last_state {
                Some(state) => write!(
                    f,
                    "timed out after {}s and {} queries, last state {}",
                    elapsed.as_secs(),
                    attempts,
                    state.on_chain_state.as_deref().unwrap_or("null")
                ),
                None => write!(
                    f,
                    "timed out after {}s and {} queries, invoice never listed",
                    elapsed.as_secs(),
                    attempts
                ),
            },
        }
    }
}

/// Polls an injected status query until a terminal state or timeout
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPoller {
    budget: PollBudget,
}

impl ConfirmationPoller {
    pub fn new(budget: PollBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &PollBudget {
        &self.budget
    }

    /// Run until a terminal state is observed or the budget elapses
    ///
    /// Query failures are logged and polling continues.
    pub async fn run<F, Fut>(&self, blockchain_identifier: &str, mut query: F) -> PollOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<PaymentState>, PaymentError>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_state: Option<PaymentState> = None;

        sleep(self.budget.initial_delay).await;

        loop {
            attempts += 1;

            match query().await {
                Ok(Some(state)) => match classify(state.on_chain_state.as_deref()) {
                    Classification::Success => {
                        return PollOutcome::Confirmed { state, attempts };
                    }
                    Classification::Error => {
                        return PollOutcome::LedgerError { state, attempts };
                    }
                    Classification::Pending => {
                        tracing::debug!(
                            target: "escrow_jobs::poll",
                            blockchain_identifier,
                            attempt = attempts,
                            state = state.on_chain_state.as_deref().unwrap_or("null"),
                            "payment pending"
                        );
                        last_state = Some(state);
                    }
                },
                Ok(None) => {
                    tracing::debug!(
                        target: "escrow_jobs::poll",
                        blockchain_identifier,
                        attempt = attempts,
                        "payment not listed yet"
                    );
                }
                Err(e) => {
                    let state = last_state.as_ref().and_then(|s| s.on_chain_state.as_deref());
                    log_poll_event(blockchain_identifier, attempts, state, Some(&e.to_string()));
                }
            }

            sleep(self.budget.interval).await;

            if started.elapsed() >= self.budget.timeout {
                return PollOutcome::TimedOut {
                    last_state,
                    attempts,
                    elapsed: started.elapsed(),
                };
            }
        }
    }
}
