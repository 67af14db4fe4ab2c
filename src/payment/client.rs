//! Payment Service Client
//!
//! HTTP client for the escrow payment service. The service is reached
//! through the [`PaymentLedger`] trait so the lifecycle controller can be
//! driven against a stub in tests.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::types::{
    decode_data, envelope_data, find_listed_state, CreateInvoiceRequest, Invoice, LockResult,
    PaymentState, PurchaseRequest, SubmitResultRequest, PAYMENT_LIST_FIELDS, PURCHASE_LIST_FIELDS,
};
use crate::common::config::PaymentServiceConfig;
use crate::common::logging::log_payment_event;
use crate::hashing::{self, HashError};
use crate::types::Payment;

/// Payment service errors
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    #[error("missing configuration: {0}")]
    MissingConfig(String),
}

impl PaymentError {
    /// Transport and upstream failures may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Network(_) | PaymentError::Upstream { .. })
    }
}

/// Escrow payment ledger operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Create an escrow invoice for `(purchaser_id, input)`
    async fn create_invoice(
        &self,
        purchaser_id: &str,
        input: &Value,
        result_window: Duration,
        metadata: Option<String>,
    ) -> Result<Invoice, PaymentError>;

    /// Commit purchaser funds against an issued invoice
    async fn lock_funds(&self, payment: &Payment, purchaser_id: &str)
        -> Result<LockResult, PaymentError>;

    /// Seller-side state of an escrow, `None` when not listed
    async fn query_status(
        &self,
        blockchain_identifier: &str,
    ) -> Result<Option<PaymentState>, PaymentError>;

    /// Purchaser-side state of an escrow, `None` when not listed
    async fn query_purchase_status(
        &self,
        blockchain_identifier: &str,
    ) -> Result<Option<PaymentState>, PaymentError>;

    /// Report the result hash that closes the escrow obligation
    async fn submit_result(
        &self,
        blockchain_identifier: &str,
        purchaser_id: &str,
        result: &Value,
    ) -> Result<(), PaymentError>;
}

/// HTTP implementation of [`PaymentLedger`]
#[derive(Debug, Clone)]
pub struct PaymentClient {
    client: Client,
    config: PaymentServiceConfig,
}

impl PaymentClient {
    pub fn new(config: PaymentServiceConfig) -> Result<Self, PaymentError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PaymentServiceConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        self.client
            .request(method, url)
            .header("token", &self.config.api_key)
            .header("accept", "application/json")
    }

    /// Send and decode the body, mapping non-2xx to `Upstream`
    async fn send(&self, request: RequestBuilder) -> Result<Value, PaymentError> {
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(PaymentError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| PaymentError::InvalidResponse(e.to_string()))
    }

    async fn list(
        &self,
        path: &str,
        candidates: &[&str],
        blockchain_identifier: &str,
    ) -> Result<Option<PaymentState>, PaymentError> {
        let request = self.request(Method::GET, path).query(&[
            ("network", self.config.network.as_str()),
            ("blockchainIdentifier", blockchain_identifier),
        ]);
        let body = self.send(request).await?;
        Ok(find_listed_state(&body, candidates, blockchain_identifier))
    }
}

fn record<T>(
    operation: &str,
    blockchain_identifier: Option<&str>,
    started: Instant,
    result: &Result<T, PaymentError>,
) {
    let elapsed = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => log_payment_event(operation, blockchain_identifier, elapsed, true, None),
        Err(e) => log_payment_event(
            operation,
            blockchain_identifier,
            elapsed,
            false,
            Some(&e.to_string()),
        ),
    }
}

#[async_trait]
impl PaymentLedger for PaymentClient {
    async fn create_invoice(
        &self,
        purchaser_id: &str,
        input: &Value,
        result_window: Duration,
        metadata: Option<String>,
    ) -> Result<Invoice, PaymentError> {
        let started = Instant::now();
        let input_hash = hashing::input_hash(purchaser_id, input)?;
        let body = CreateInvoiceRequest::new(
            &self.config,
            purchaser_id,
            input_hash,
            Utc::now(),
            result_window,
            metadata,
        );

        let result = match self.send(self.request(Method::POST, "/payment/").json(&body)).await {
            Ok(response) => decode_data::<Invoice>(response),
            Err(e) => Err(e),
        };

        let bid = result
            .as_ref()
            .ok()
            .map(|invoice| invoice.payment.blockchain_identifier.as_str());
        record("create_invoice", bid, started, &result);
        result
    }

    async fn lock_funds(
        &self,
        payment: &Payment,
        purchaser_id: &str,
    ) -> Result<LockResult, PaymentError> {
        let started = Instant::now();
        let body = PurchaseRequest::new(&self.config, payment, purchaser_id)?;

        let result = self
            .send(self.request(Method::POST, "/purchase/").json(&body))
            .await
            .map(|response| LockResult::from_data(envelope_data(response)));

        record(
            "lock_funds",
            Some(&payment.blockchain_identifier),
            started,
            &result,
        );
        result
    }

    async fn query_status(
        &self,
        blockchain_identifier: &str,
    ) -> Result<Option<PaymentState>, PaymentError> {
        let started = Instant::now();
        let result = self
            .list("/payment/", &PAYMENT_LIST_FIELDS, blockchain_identifier)
            .await;
        record("query_status", Some(blockchain_identifier), started, &result);
        result
    }

    async fn query_purchase_status(
        &self,
        blockchain_identifier: &str,
    ) -> Result<Option<PaymentState>, PaymentError> {
        let started = Instant::now();
        let result = self
            .list("/purchase/", &PURCHASE_LIST_FIELDS, blockchain_identifier)
            .await;
        record(
            "query_purchase_status",
            Some(blockchain_identifier),
            started,
            &result,
        );
        result
    }

    async fn submit_result(
        &self,
        blockchain_identifier: &str,
        purchaser_id: &str,
        result: &Value,
    ) -> Result<(), PaymentError> {
        let started = Instant::now();
        let body = SubmitResultRequest {
            network: self.config.network,
            blockchain_identifier: blockchain_identifier.to_string(),
            submit_result_hash: hashing::result_hash(purchaser_id, result)?,
        };

        let outcome = self
            .send(self.request(Method::POST, "/payment/submit-result").json(&body))
            .await
            .map(|_| ());

        record("submit_result", Some(blockchain_identifier), started, &outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Network;
    use serde_json::json;

    fn config() -> PaymentServiceConfig {
        PaymentServiceConfig::new("http://localhost:3001/api/v1/", "key", "agent_1", Network::Preprod)
    }

    fn client_for(base_url: &str) -> PaymentClient {
        PaymentClient::new(PaymentServiceConfig::new(
            base_url,
            "key",
            "agent_1",
            Network::Preprod,
        ))
        .unwrap()
    }

    /// Answer one HTTP request with a canned response, yielding the raw request text
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .map(|(_, value)| value.trim().parse::<usize>().unwrap())
                        .unwrap_or(0);
                    if received.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            String::from_utf8_lossy(&received).to_string()
        });

        (base_url, handle)
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = PaymentClient::new(config()).unwrap();
        assert_eq!(client.config().base_url, "http://localhost:3001/api/v1");

        let request = client.request(Method::GET, "/payment/").build().unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:3001/api/v1/payment/");
        assert_eq!(request.headers()["token"], "key");
    }

    #[test]
    fn test_submit_result_body_carries_result_hash() {
        let body = SubmitResultRequest {
            network: Network::Preprod,
            blockchain_identifier: "chain_abc".to_string(),
            submit_result_hash: hashing::result_hash("user1", "hello").unwrap(),
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "network": "Preprod",
                "blockchainIdentifier": "chain_abc",
                "submitResultHash": "d1cd54ac7e68368c4d616b2e71afadc14a2144a55d0df57d2344d42904d84821"
            })
        );
    }

    #[test]
    fn test_retryable_errors() {
        let upstream = PaymentError::Upstream {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert!(upstream.is_retryable());
        assert!(upstream.to_string().contains("503"));
        assert!(!PaymentError::InvalidResponse("bad".to_string()).is_retryable());
        assert!(!PaymentError::MissingConfig("seller_vkey".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn test_non_success_status_maps_to_upstream() {
        let (base_url, server) = serve_once("HTTP/1.1 500 Internal Server Error", "boom").await;
        let client = client_for(&base_url);

        let result = client.query_status("chain_abc").await;
        match result {
            Err(PaymentError::Upstream { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected upstream error, got {:?}", other),
        }

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /payment/?"));
        assert!(request.contains("blockchainIdentifier=chain_abc"));
    }

    #[tokio::test]
    async fn test_query_status_parses_listing() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"status":"success","data":{"Payments":[{"blockchainIdentifier":"chain_abc","onChainState":"FundsLocked"}]}}"#,
        )
        .await;
        let client = client_for(&base_url);

        let state = client.query_status("chain_abc").await.unwrap().unwrap();
        assert_eq!(state.blockchain_identifier, "chain_abc");
        assert_eq!(state.on_chain_state.as_deref(), Some("FundsLocked"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_result_posts_with_token_header() {
        let (base_url, server) = serve_once("HTTP/1.1 200 OK", r#"{"status":"success"}"#).await;
        let client = client_for(&base_url);

        client
            .submit_result("chain_abc", "user1", &json!("hello"))
            .await
            .unwrap();

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /payment/submit-result "));
        assert!(lower.contains("\r\ntoken: key\r\n"));
        assert!(request.contains(
            "d1cd54ac7e68368c4d616b2e71afadc14a2144a55d0df57d2344d42904d84821"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_maps_to_network() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let result = client_for(&base_url).query_status("chain_abc").await;
        assert!(matches!(result, Err(PaymentError::Network(_))));
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_lock_funds_without_seller_vkey_fails_before_sending() {
        let client = PaymentClient::new(config()).unwrap();
        let payment: Payment = serde_json::from_value(json!({
            "blockchainIdentifier": "chain_abc",
            "payByTime": "1",
            "submitResultTime": "2",
            "unlockTime": "3",
            "externalDisputeUnlockTime": "4",
            "inputHash": "ab"
        }))
        .unwrap();

        let result = client.lock_funds(&payment, "user1").await;
        assert!(matches!(result, Err(PaymentError::MissingConfig(_))));
    }
}
