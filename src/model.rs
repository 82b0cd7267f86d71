//! Shared data shapes: products, cart lines, sale records, sessions.
//!
//! Monetary amounts are `i64` in the smallest currency unit throughout; no
//! floats anywhere near money. Quantities are `u32`, so a negative quantity
//! is unrepresentable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog view of a sellable product.
///
/// The catalog itself lives with the caller; the core only needs identity,
/// price, and an optional display name carried into sale history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    /// Price per unit in the smallest currency unit.
    pub unit_price: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub product_name: Option<String>,
}

/// One line of a cart or a sale.
///
/// The line subtotal is always computed from `unit_price` and `quantity`;
/// it is deliberately not a stored field, so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub product_name: Option<String>,
    /// Price per unit in the smallest currency unit.
    pub unit_price: i64,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.product_id.clone(),
            product_name: product.product_name.clone(),
            unit_price: product.unit_price,
            quantity,
        }
    }

    /// Line total in the smallest currency unit.
    pub fn subtotal(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

/// How a sale was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Other => "other",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "other" => Ok(PaymentMethod::Other),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed sale, durable on this terminal.
///
/// Immutable once appended, with one exception: `synced` flips false to true
/// exactly once when the remote ledger acknowledges the sale (plus the sync
/// bookkeeping fields, which are diagnostics only). The set of records with
/// `synced == false` is the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sale_id: String,
    /// Sale time as unix seconds; what the ledger receives.
    pub timestamp: i64,
    /// Snapshot of the cart lines at checkout, never aliased to a live cart.
    pub items: Vec<LineItem>,
    /// Grand total in the smallest currency unit, fixed at checkout time.
    pub total_amount: i64,
    pub payment_method: PaymentMethod,
    pub terminal_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub employee_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_id: Option<String>,
    /// False until the remote ledger acknowledges this sale.
    pub synced: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub synced_at: Option<DateTime<Utc>>,
    /// Failed submission count. Diagnostics only; never gates a retry.
    #[serde(default)]
    pub sync_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_sync_error: Option<String>,
}

/// Who is operating the terminal.
///
/// Produced by the caller's sign-in flow against the remote system; the core
/// only requires that one is present at checkout and stamps its fields onto
/// the sale record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    /// Operator badge number (seven digits in the upstream system).
    pub employee_number: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_id: Option<String>,
}

/// Acknowledgement from the remote ledger for one recorded sale.
///
/// A replayed submission of an already-recorded sale (same idempotency key)
/// is acknowledged with the same shape rather than creating a second sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAck {
    pub sale_id: String,
    #[serde(default)]
    pub status: String,
}
