//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the escrow job engine.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{ConfigError, GateConfig, Network, PaymentServiceConfig};
pub use error::{GateError, Result};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_job_event, log_notifier_event,
    log_payment_event, log_poll_event, ErrorDetails, EventCategory, LogEvent, LogLevel,
    LoggingError,
};
