//! Structured Logging for the Escrow Job Engine
//!
//! Provides structured logging with:
//! - JSON output for log aggregation services
//! - Correlation IDs that follow a job through invoice, poll and completion
//! - Call durations for payment service requests
//!
//! # Usage
//!
//! ```rust,ignore
//! use escrow_jobs::common::logging::{init_logging, LogLevel};
//!
//! // Initialize at startup
//! init_logging(LogLevel::Info, true)?; // JSON mode for production
//!
//! // Log events
//! info!(target: "escrow_jobs::job", job_id = %id, "Job created");
//! ```

use rand::Rng;
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::config::GateConfig;

pub const JOB_TARGET: &str = "escrow_jobs::job";
pub const PAYMENT_TARGET: &str = "escrow_jobs::payment";
pub const POLL_TARGET: &str = "escrow_jobs::poll";
pub const NOTIFIER_TARGET: &str = "escrow_jobs::notifier";

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Job creation and status transitions
    Job,
    /// Calls to the payment service
    Payment,
    /// Confirmation polling
    Poll,
    /// Background poll dispatch
    Notifier,
    /// System events (startup, shutdown)
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    /// Usually the job id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_filter().to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": {:?}}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Event Logging
// ============================================================================

/// Log a job lifecycle event
pub fn log_job_event(
    event_type: &str,
    job_id: &str,
    status: &str,
    success: bool,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Job, event_type)
        .with_correlation_id(job_id)
        .with_data(serde_json::json!({
            "job_id": job_id,
            "status": status,
            "success": success
        }));

    if let Some(err) = error {
        event = event.with_error("JOB_ERROR", err);
    }

    if success {
        tracing::info!(target: JOB_TARGET, "{}", event.to_json());
    } else {
        tracing::error!(target: JOB_TARGET, "{}", event.to_json());
    }
}

/// Log a payment service call
pub fn log_payment_event(
    operation: &str,
    blockchain_identifier: Option<&str>,
    duration_ms: u64,
    success: bool,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let mut event = LogEvent::new(level, EventCategory::Payment, operation)
        .with_duration(duration_ms)
        .with_data(serde_json::json!({
            "operation": operation,
            "blockchain_identifier": blockchain_identifier,
            "success": success
        }));

    if let Some(bid) = blockchain_identifier {
        event = event.with_correlation_id(bid);
    }
    if let Some(err) = error {
        event = event.with_error("PAYMENT_ERROR", err);
    }

    if success {
        tracing::debug!(target: PAYMENT_TARGET, "{}", event.to_json());
    } else {
        tracing::warn!(target: PAYMENT_TARGET, "{}", event.to_json());
    }
}

/// Log one confirmation poll attempt
///
/// Failed queries are logged at warn; polling continues afterwards.
pub fn log_poll_event(
    blockchain_identifier: &str,
    attempt: u32,
    on_chain_state: Option<&str>,
    error: Option<&str>,
) {
    let level = if error.is_some() { LogLevel::Warn } else { LogLevel::Debug };
    let mut event = LogEvent::new(level, EventCategory::Poll, "poll_attempt")
        .with_correlation_id(blockchain_identifier)
        .with_data(serde_json::json!({
            "attempt": attempt,
            "on_chain_state": on_chain_state
        }));

    if let Some(err) = error {
        event = event.with_error("POLL_QUERY_FAILED", err);
        tracing::warn!(target: POLL_TARGET, "{}", event.to_json());
    } else {
        tracing::debug!(target: POLL_TARGET, "{}", event.to_json());
    }
}

/// Log a background poll dispatch outcome
pub fn log_notifier_event(event_type: &str, job_id: &str, error: Option<&str>) {
    match error {
        Some(err) => {
            let event = LogEvent::new(LogLevel::Error, EventCategory::Notifier, event_type)
                .with_correlation_id(job_id)
                .with_error("NOTIFIER_ERROR", err);
            tracing::error!(target: NOTIFIER_TARGET, "{}", event.to_json());
        }
        None => {
            let event = LogEvent::new(LogLevel::Info, EventCategory::Notifier, event_type)
                .with_correlation_id(job_id);
            tracing::info!(target: NOTIFIER_TARGET, "{}", event.to_json());
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (recommended for production)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("escrow_jobs={}", level.as_filter())));

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from GateConfig
pub fn init_from_config(config: &GateConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.log_json)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Generate a correlation ID for tracing a CLI invocation or batch
pub fn generate_correlation_id() -> String {
    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let suffix: u16 = rand::thread_rng().gen();

    format!("{:x}-{:04x}", timestamp & 0xFFFF_FFFF, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::Job, "job_created")
            .with_correlation_id("00aa11bb22cc33")
            .with_data(serde_json::json!({"status": "awaiting_payment"}))
            .with_duration(42);

        let json = event.to_json();
        assert!(json.contains("job_created"));
        assert!(json.contains("00aa11bb22cc33"));
        assert!(json.contains("\"category\":\"job\""));
        assert!(json.contains("\"duration_ms\":42"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_log_event_error_details() {
        let event = LogEvent::new(LogLevel::Warn, EventCategory::Poll, "poll_attempt")
            .with_error("POLL_QUERY_FAILED", "upstream returned 502");

        let parsed: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["level"], "WARN");
        assert_eq!(parsed["error"]["code"], "POLL_QUERY_FAILED");
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_correlation_id_generation() {
        let id = generate_correlation_id();
        let (time_part, suffix) = id.split_once('-').unwrap();
        assert!(!time_part.is_empty());
        assert_eq!(suffix.len(), 4);
    }
}
