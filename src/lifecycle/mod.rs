//! Job Lifecycle Module
//!
//! The controller that moves jobs through invoice, confirmation and
//! completion, and the background notifier that runs confirmation polls
//! off the job creation path.

pub mod controller;
pub mod notifier;

pub use controller::{CreateJobError, JobController, JobError, LifecycleSettings, PollReport};
pub use notifier::{run_poll_worker, BackgroundNotifier, PollReceiver, PollRequest};
