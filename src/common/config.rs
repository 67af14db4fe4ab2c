//! Environment-based Configuration
//!
//! All credentials come from environment variables, never from hardcoded
//! values.
//!
//! # Required Environment Variables
//!
//! - `ESCROW_PAYMENT_URL` - Payment service base URL (e.g. `http://localhost:3001/api/v1`)
//! - `ESCROW_API_KEY` - API key, sent as the `token` header
//! - `ESCROW_AGENT_IDENTIFIER` - Registered agent identifier
//!
//! # Optional Settings
//!
//! - `ESCROW_NETWORK` - "preprod" or "mainnet" (default: "preprod")
//! - `ESCROW_SELLER_VKEY` - Seller verification key (required for lock-funds)
//! - `ESCROW_PAY_BY_MINS` - Payment window (default: 5)
//! - `ESCROW_RESULT_WINDOW_MINS` - Result submission window (default: 20)
//! - `ESCROW_POLL_INTERVAL_SECS` - Confirmation poll interval (default: 10)
//! - `ESCROW_POLL_TIMEOUT_MINS` - Confirmation poll budget (default: 10)
//! - `ESCROW_INITIAL_DELAY_SECS` - Wait before the first poll, 2-5 (default: 3)
//! - `ESCROW_REQUEST_TIMEOUT_SECS` - HTTP request timeout (default: 30)
//! - `ESCROW_DB_PATH` - SQLite job store path (default: "data/jobs.db")
//! - `ESCROW_LOG_LEVEL` - Logging level (default: "info")
//! - `ESCROW_LOG_JSON` - Set to "1" for JSON log output

use serde::{Serialize, Serializer};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::poller::PollBudget;

/// Payment type understood by the escrow contract
pub const PAYMENT_TYPE: &str = "Web3CardanoV1";

/// Default window the purchaser has to lock funds
pub const DEFAULT_PAY_BY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default window the agent has to submit a result
pub const DEFAULT_RESULT_WINDOW: Duration = Duration::from_secs(20 * 60);

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Ledger network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Preprod,
    Mainnet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preprod" | "testnet" => Ok(Network::Preprod),
            "mainnet" | "main" => Ok(Network::Mainnet),
            _ => Err(ConfigError::InvalidValue(
                "ESCROW_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Preprod => "Preprod",
            Network::Mainnet => "Mainnet",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Connection settings for the payment service
#[derive(Debug, Clone)]
pub struct PaymentServiceConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// API key sent as the `token` header
    pub api_key: String,
    pub agent_identifier: String,
    pub network: Network,
    /// Only needed for lock-funds (purchase) calls
    pub seller_vkey: Option<String>,
    pub payment_type: String,
    pub pay_by_window: Duration,
    pub request_timeout: Duration,
}

impl PaymentServiceConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        agent_identifier: impl Into<String>,
        network: Network,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            agent_identifier: agent_identifier.into(),
            network,
            seller_vkey: None,
            payment_type: PAYMENT_TYPE.to_string(),
            pay_by_window: DEFAULT_PAY_BY_WINDOW,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_seller_vkey(mut self, seller_vkey: impl Into<String>) -> Self {
        self.seller_vkey = Some(seller_vkey.into());
        self
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub payment: PaymentServiceConfig,
    pub poll: PollBudget,
    pub result_window: Duration,
    pub db_path: String,
    pub log_level: String,
    pub log_json: bool,
}

impl GateConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let network: Network = lookup("ESCROW_NETWORK")
            .unwrap_or_else(|| "preprod".to_string())
            .parse()?;

        let mut payment = PaymentServiceConfig::new(
            required("ESCROW_PAYMENT_URL")?,
            required("ESCROW_API_KEY")?,
            required("ESCROW_AGENT_IDENTIFIER")?,
            network,
        );
        payment.seller_vkey = lookup("ESCROW_SELLER_VKEY").filter(|v| !v.is_empty());
        payment.pay_by_window = minutes_or(&lookup, "ESCROW_PAY_BY_MINS", 5)?;
        payment.request_timeout =
            Duration::from_secs(parse_or(&lookup, "ESCROW_REQUEST_TIMEOUT_SECS", 30)?);

        let interval_secs = parse_or(&lookup, "ESCROW_POLL_INTERVAL_SECS", 10)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ESCROW_POLL_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let timeout = minutes_or(&lookup, "ESCROW_POLL_TIMEOUT_MINS", 10)?;
        let initial_delay_secs = parse_or(&lookup, "ESCROW_INITIAL_DELAY_SECS", 3)?;

        let poll = PollBudget {
            timeout,
            ..PollBudget::new(interval_secs, 0)
        }
        .with_initial_delay(Duration::from_secs(initial_delay_secs));

        let result_window = minutes_or(&lookup, "ESCROW_RESULT_WINDOW_MINS", 20)?;

        let db_path = lookup("ESCROW_DB_PATH").unwrap_or_else(|| "data/jobs.db".to_string());
        let log_level = lookup("ESCROW_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_json = lookup("ESCROW_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        Ok(Self {
            payment,
            poll,
            result_window,
            db_path,
            log_level,
            log_json,
        })
    }

    /// Print configuration summary (hiding the API key)
    pub fn print_summary(&self) {
        println!("=== Escrow Jobs Configuration ===");
        println!("Payment Service: {}", self.payment.base_url);
        println!("Network: {}", self.payment.network);
        println!("Agent: {}", self.payment.agent_identifier);
        println!(
            "Poll: every {}s for {}s (initial delay {}s)",
            self.poll.interval.as_secs(),
            self.poll.timeout.as_secs(),
            self.poll.initial_delay.as_secs()
        );
        println!("Result Window: {} min", self.result_window.as_secs() / 60);
        println!("Job Store: {}", self.db_path);
        println!("=================================");
    }
}

fn parse_or<F>(lookup: &F, name: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("not a number: {}", raw))
        }),
        None => Ok(default),
    }
}

fn minutes_or<F>(lookup: &F, name: &str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, name, default)?
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue(name.to_string(), "too many minutes".to_string()))
}
