//! Remote sales ledger HTTP client.
//!
//! Speaks the ledger's "record sale" contract: `POST {base}/sales` with the
//! sale id as idempotency key, so replaying a submission after a lost
//! response can never create a second sale. Authentication is an opaque
//! header map supplied by the caller through [`AuthHeaderProvider`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::CoreConfig;
use crate::error::SyncError;
use crate::model::{LedgerAck, SaleRecord};
use crate::network::ConnectivityProbe;
use crate::sync::SalesLedger;

/// Supplies the authentication headers attached to every ledger request.
///
/// The core treats the map as opaque; how the headers are produced (session
/// tokens, signatures, API keys) stays with the caller.
pub trait AuthHeaderProvider: Send + Sync {
    fn auth_headers(&self) -> HashMap<String, String>;
}

/// Provider for ledgers that need no authentication (development setups,
/// tests).
pub struct NoAuth;

impl AuthHeaderProvider for NoAuth {
    fn auth_headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the ledger base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Classify a `reqwest::Error` against the ledger base URL.
fn friendly_error(url: &str, err: &reqwest::Error) -> SyncError {
    if err.is_connect() {
        return SyncError::Unreachable {
            url: url.to_string(),
        };
    }
    if err.is_timeout() {
        return SyncError::Timeout {
            url: url.to_string(),
        };
    }
    SyncError::Network {
        reason: err.to_string(),
    }
}

/// Convert an HTTP status code into a user-facing message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Sales ledger endpoint not found".to_string(),
        s if s >= 500 => format!("Sales ledger server error (HTTP {s})"),
        s => format!("Unexpected response from sales ledger (HTTP {s})"),
    }
}

/// Build a [`SyncError::Server`], preferring the error detail in the body
/// when the ledger sent one.
fn server_error(status: StatusCode, body_text: &str) -> SyncError {
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .or_else(|| json.get("detail"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| status_error(status));
    SyncError::Server {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SaleItemPayload<'a> {
    product_id: &'a str,
    quantity: u32,
    unit_price: i64,
}

#[derive(Serialize)]
struct SalePayload<'a> {
    items: Vec<SaleItemPayload<'a>>,
    total_amount: i64,
    payment_method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<&'a str>,
    terminal_id: &'a str,
}

fn payload_for(record: &SaleRecord) -> SalePayload<'_> {
    SalePayload {
        items: record
            .items
            .iter()
            .map(|item| SaleItemPayload {
                product_id: &item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect(),
        total_amount: record.total_amount,
        payment_method: record.payment_method.as_str(),
        event_id: record.event_id.as_deref(),
        terminal_id: &record.terminal_id,
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// [`SalesLedger`] implementation over HTTP.
pub struct HttpLedger {
    client: Client,
    config: CoreConfig,
    auth: Arc<dyn AuthHeaderProvider>,
}

impl HttpLedger {
    pub fn new(config: CoreConfig, auth: Arc<dyn AuthHeaderProvider>) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Network {
                reason: format!("build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config,
            auth,
        })
    }

    /// Lightweight connectivity probe: `HEAD {base}/health` with the probe
    /// timeout. Any 2xx counts as online.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);
        let mut req = self.client.head(&url).timeout(self.config.probe_timeout);
        for (name, value) in self.auth.auth_headers() {
            req = req.header(name.as_str(), value.as_str());
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                let online = status.is_success();
                debug!(online, status = status.as_u16(), "ledger health probe");
                online
            }
            Err(e) => {
                debug!(error = %e, "ledger health probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl SalesLedger for HttpLedger {
    async fn record_sale(&self, record: &SaleRecord) -> Result<LedgerAck, SyncError> {
        let url = format!("{}/sales", self.config.base_url);

        let mut req = self
            .client
            .post(&url)
            .header("Idempotency-Key", &record.sale_id)
            .header("Content-Type", "application/json");
        for (name, value) in self.auth.auth_headers() {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .json(&payload_for(record))
            .send()
            .await
            .map_err(|e| friendly_error(&self.config.base_url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(server_error(status, &body_text));
        }

        let body_text = resp.text().await.unwrap_or_default();
        if body_text.is_empty() {
            // Bodyless 2xx: accepted under the submitted id
            return Ok(LedgerAck {
                sale_id: record.sale_id.clone(),
                status: "completed".to_string(),
            });
        }
        serde_json::from_str(&body_text).map_err(|e| SyncError::InvalidResponse {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpLedger {
    async fn is_reachable(&self) -> bool {
        self.health_check().await
    }
}
