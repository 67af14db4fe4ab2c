//! Payment Service Wire Types
//!
//! Request and response bodies for the escrow payment service. All bodies
//! are camelCase JSON; responses wrap their payload in `{ "data": ... }`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::client::PaymentError;
use crate::common::config::{Network, PaymentServiceConfig};
use crate::types::Payment;

/// List field names for payments, newest service casing first
pub const PAYMENT_LIST_FIELDS: [&str; 2] = ["Payments", "payments"];

/// List field names for purchases, newest service casing first
pub const PURCHASE_LIST_FIELDS: [&str; 2] = ["Purchases", "purchases"];

/// `POST /payment/` body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub agent_identifier: String,
    pub network: Network,
    pub input_hash: String,
    pub pay_by_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub payment_type: String,
    pub submit_result_time: String,
    pub identifier_from_purchaser: String,
}

impl CreateInvoiceRequest {
    /// Build the request with deadlines relative to `now`
    pub fn new(
        config: &PaymentServiceConfig,
        purchaser_id: &str,
        input_hash: String,
        now: DateTime<Utc>,
        result_window: Duration,
        metadata: Option<String>,
    ) -> Self {
        Self {
            agent_identifier: config.agent_identifier.clone(),
            network: config.network,
            input_hash,
            pay_by_time: deadline(now, config.pay_by_window),
            metadata,
            payment_type: config.payment_type.clone(),
            submit_result_time: deadline(now, result_window),
            identifier_from_purchaser: purchaser_id.to_string(),
        }
    }
}

fn deadline(now: DateTime<Utc>, window: Duration) -> String {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    (now + window).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Invoice returned by `POST /payment/`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    #[serde(flatten)]
    pub payment: Payment,
    #[serde(default)]
    pub on_chain_state: Option<String>,
    #[serde(rename = "RequestedFunds", default)]
    pub requested_funds: Vec<Value>,
}

/// `POST /purchase/` body
///
/// The four deadlines and the input hash are copied byte-for-byte from the
/// invoice; the service verifies its signature over exactly these strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub identifier_from_purchaser: String,
    pub network: Network,
    pub seller_vkey: String,
    pub payment_type: String,
    pub blockchain_identifier: String,
    pub pay_by_time: String,
    pub submit_result_time: String,
    pub unlock_time: String,
    pub external_dispute_unlock_time: String,
    pub agent_identifier: String,
    pub input_hash: String,
}

impl PurchaseRequest {
    pub fn new(
        config: &PaymentServiceConfig,
        payment: &Payment,
        purchaser_id: &str,
    ) -> Result<Self, PaymentError> {
        let seller_vkey = config
            .seller_vkey
            .clone()
            .ok_or_else(|| PaymentError::MissingConfig("seller_vkey".to_string()))?;

        Ok(Self {
            identifier_from_purchaser: purchaser_id.to_string(),
            network: config.network,
            seller_vkey,
            payment_type: config.payment_type.clone(),
            blockchain_identifier: payment.blockchain_identifier.clone(),
            pay_by_time: payment.pay_by_time.as_str().to_string(),
            submit_result_time: payment.submit_result_time.as_str().to_string(),
            unlock_time: payment.unlock_time.as_str().to_string(),
            external_dispute_unlock_time: payment.external_dispute_unlock_time.as_str().to_string(),
            agent_identifier: config.agent_identifier.clone(),
            input_hash: payment.input_hash.clone(),
        })
    }
}

/// Purchase confirmation returned by `POST /purchase/`
#[derive(Debug, Clone, PartialEq)]
pub struct LockResult {
    pub blockchain_identifier: Option<String>,
    pub on_chain_state: Option<String>,
    pub raw: Value,
}

impl LockResult {
    pub fn from_data(raw: Value) -> Self {
        Self {
            blockchain_identifier: string_field(&raw, "blockchainIdentifier"),
            on_chain_state: string_field(&raw, "onChainState"),
            raw,
        }
    }
}

/// `POST /payment/submit-result` body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResultRequest {
    pub network: Network,
    pub blockchain_identifier: String,
    pub submit_result_hash: String,
}

/// Current ledger view of one escrow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentState {
    pub blockchain_identifier: String,
    /// `None` while the ledger has not indexed a state yet
    pub on_chain_state: Option<String>,
    pub raw: Value,
}

/// Unwrap the `data` envelope, tolerating bare payloads
pub fn envelope_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Decode the `data` payload of a response body
pub fn decode_data<T: DeserializeOwned>(body: Value) -> Result<T, PaymentError> {
    serde_json::from_value(envelope_data(body))
        .map_err(|e| PaymentError::InvalidResponse(e.to_string()))
}

/// Find an escrow in a listing response
///
/// The service has shipped both `Payments` and `payments` (and likewise for
/// purchases) across versions, so each candidate field is tried in turn.
pub fn find_listed_state(
    body: &Value,
    candidates: &[&str],
    blockchain_identifier: &str,
) -> Option<PaymentState> {
    let data = body.get("data").unwrap_or(body);

    candidates
        .iter()
        .filter_map(|field| data.get(*field).and_then(Value::as_array))
        .flatten()
        .find(|entry| {
            entry.get("blockchainIdentifier").and_then(Value::as_str) == Some(blockchain_identifier)
        })
        .map(|entry| PaymentState {
            blockchain_identifier: blockchain_identifier.to_string(),
            on_chain_state: string_field(entry, "onChainState"),
            raw: entry.clone(),
        })
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}
