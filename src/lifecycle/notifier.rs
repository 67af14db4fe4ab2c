//! Background Notifier
//!
//! Decouples job creation from confirmation polling. `fire` enqueues a
//! poll request and returns immediately; a worker drains the queue and runs
//! each poll as its own task. Poll failures and panics are logged by the
//! worker and never reach the job creator.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use super::controller::{JobController, JobError, PollReport};
use crate::common::logging::{log_notifier_event, NOTIFIER_TARGET};
use crate::types::Job;

/// Receiving half of the poll queue
pub type PollReceiver = mpsc::UnboundedReceiver<PollRequest>;

/// Request to poll a job's payment
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub job_id: String,
    /// Snapshot of the job, saving the worker a store read
    pub job: Option<Job>,
}

impl PollRequest {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job: None,
        }
    }

    pub fn with_job(job: Job) -> Self {
        Self {
            job_id: job.job_id().to_string(),
            job: Some(job),
        }
    }
}

/// Fire-and-forget handle onto the poll queue
#[derive(Debug, Clone)]
pub struct BackgroundNotifier {
    tx: mpsc::UnboundedSender<PollRequest>,
}

impl BackgroundNotifier {
    pub fn channel() -> (Self, PollReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a poll request without waiting for it
    pub fn fire(&self, request: PollRequest) {
        let job_id = request.job_id.clone();
        match self.tx.send(request) {
            Ok(()) => log_notifier_event("poll_queued", &job_id, None),
            Err(_) => log_notifier_event("poll_dispatch_failed", &job_id, Some("poll worker is not running")),
        }
    }
}

type PollTaskResult = (String, Result<PollReport, JobError>);

/// Drain the poll queue, running each request as a supervised task
///
/// Returns once every notifier handle is dropped and in-flight polls end.
pub async fn run_poll_worker(controller: Arc<JobController>, mut rx: PollReceiver) {
    let mut tasks: JoinSet<PollTaskResult> = JoinSet::new();

    loop {
        tokio::select! {
            request = rx.recv() => match request {
                Some(request) => {
                    let controller = controller.clone();
                    tasks.spawn(async move {
                        let job_id = request.job_id.clone();
                        (job_id, controller.handle_poll_request(request).await)
                    });
                }
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => supervise(joined),
        }
    }

    while let Some(joined) = tasks.join_next().await {
        supervise(joined);
    }
}

fn supervise(joined: Result<PollTaskResult, JoinError>) {
    match joined {
        Ok((job_id, Ok(report))) => match report.outcome {
            Some(outcome) => tracing::info!(
                target: NOTIFIER_TARGET,
                job_id = %job_id,
                status = %report.job.status(),
                outcome = %outcome,
                "background poll finished"
            ),
            None => log_notifier_event("poll_skipped", &job_id, None),
        },
        // Failed creations queue a request with nothing stored behind it
        Ok((job_id, Err(JobError::NotFound(_)))) => {
            log_notifier_event("poll_skipped_no_job", &job_id, None)
        }
        Ok((job_id, Err(e))) => log_notifier_event("poll_failed", &job_id, Some(&e.to_string())),
        Err(e) if e.is_panic() => {
            tracing::error!(target: NOTIFIER_TARGET, error = %e, "poll task panicked")
        }
        Err(e) => tracing::warn!(target: NOTIFIER_TARGET, error = %e, "poll task cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::controller::LifecycleSettings;
    use crate::payment::{Invoice, MockPaymentLedger, PaymentError, PaymentState};
    use crate::poller::PollBudget;
    use crate::storage::{JobStore, MemoryJobStore};
    use crate::types::job::fixtures;
    use crate::types::JobStatus;
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> LifecycleSettings {
        LifecycleSettings {
            result_window: Duration::from_secs(20 * 60),
            budget: PollBudget::new(10, 1).with_initial_delay(Duration::from_secs(2)),
        }
    }

    #[test]
    fn test_fire_without_worker_does_not_fail() {
        let (notifier, rx) = BackgroundNotifier::channel();
        drop(rx);
        notifier.fire(PollRequest::new("00aa11bb22cc33"));
    }

    #[test]
    fn test_poll_request_constructors() {
        let job = fixtures::job("00aa11bb22cc33");
        let request = PollRequest::with_job(job.clone());
        assert_eq!(request.job_id, "00aa11bb22cc33");
        assert_eq!(request.job, Some(job));

        assert!(PollRequest::new("00aa11bb22cc33").job.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_advances_created_job() {
        let store = MemoryJobStore::new();
        let mut ledger = MockPaymentLedger::new();
        ledger.expect_create_invoice().returning(|_, _, _, _| {
            Ok(Invoice {
                payment: fixtures::payment("chain_1"),
                on_chain_state: None,
                requested_funds: vec![],
            })
        });
        ledger.expect_query_status().times(1).returning(|bid| {
            Ok(Some(PaymentState {
                blockchain_identifier: bid.to_string(),
                on_chain_state: Some("FundsLocked".to_string()),
                raw: json!({}),
            }))
        });

        let (notifier, rx) = BackgroundNotifier::channel();
        let controller = Arc::new(JobController::new(
            Arc::new(store.clone()),
            Arc::new(ledger),
            notifier,
            settings(),
        ));
        tokio::spawn(run_poll_worker(controller.clone(), rx));

        let job = controller.create_job("user1", json!({"prompt": "hi"})).await.unwrap();
        assert_eq!(job.status(), JobStatus::AwaitingPayment);

        let mut status = job.status();
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            status = store.get(job.job_id()).await.unwrap().unwrap().status();
            if status == JobStatus::Running {
                break;
            }
        }
        assert_eq!(status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_worker_drains_and_exits_when_queue_closes() {
        let store = MemoryJobStore::new();
        let mut ledger = MockPaymentLedger::new();
        ledger.expect_create_invoice().returning(|_, _, _, _| {
            Err(PaymentError::Upstream {
                status: 503,
                body: "unavailable".to_string(),
            })
        });

        let (notifier, mut created_rx) = BackgroundNotifier::channel();
        let controller = Arc::new(JobController::new(
            Arc::new(store.clone()),
            Arc::new(ledger),
            notifier,
            settings(),
        ));

        let err = controller.create_job("user1", json!({"prompt": "hi"})).await.unwrap_err();
        let request = created_rx.try_recv().unwrap();
        assert_eq!(request.job_id, err.job_id);

        // Replay the request through a queue whose only sender is then dropped
        let (sender, rx) = BackgroundNotifier::channel();
        sender.fire(request);
        sender.fire(PollRequest::new("ffffffffffffff"));
        drop(sender);

        run_poll_worker(controller, rx).await;
        assert!(store.is_empty().await);
    }
}
