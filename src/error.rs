//! Error taxonomy for the POS core.
//!
//! Split along the crate's boundaries: [`StorageError`] for the local durable
//! store, [`SyncError`] for remote ledger submission, [`CheckoutError`] for
//! the checkout orchestrator. The dividing rule: an error that could lose a
//! sale is always surfaced, an error that only delays synchronisation is
//! always recoverable.

use thiserror::Error;

/// Failure in the local durable store.
///
/// The store never swallows its own failures; anything that could lose or
/// hide a recorded sale comes back through this type.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot open sales database at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("schema migration to v{version} failed: {reason}")]
    Migration { version: i32, reason: String },

    #[error("{context}: {reason}")]
    Query {
        context: &'static str,
        reason: String,
    },

    #[error("corrupt sale record {sale_id}: {reason}")]
    CorruptRecord { sale_id: String, reason: String },
}

impl StorageError {
    pub(crate) fn query(context: &'static str, err: rusqlite::Error) -> Self {
        Self::Query {
            context,
            reason: err.to_string(),
        }
    }
}

/// Failure submitting a sale to the remote ledger.
///
/// Every variant except [`SyncError::Storage`] is remote and transient from
/// the terminal's point of view: the record stays unsynced and is retried on
/// a later drain. `Storage` wraps a local store failure observed while
/// finalising a submission and stops a drain early.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Could not reach the ledger at all.
    #[error("Cannot reach sales ledger at {url}")]
    Unreachable { url: String },

    /// The request ran past its bounded timeout. Handled exactly like a
    /// network failure.
    #[error("Connection to sales ledger at {url} timed out")]
    Timeout { url: String },

    /// The ledger answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Server { status: u16, message: String },

    /// The ledger answered 2xx but the body was not the expected shape.
    #[error("Invalid response from sales ledger: {reason}")]
    InvalidResponse { reason: String },

    /// Anything else the HTTP client reports (TLS, request builder, ...).
    #[error("Network error communicating with sales ledger: {reason}")]
    Network { reason: String },

    /// Local store failure while recording the submission outcome.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// True when the record should simply be retried on a later drain.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncError::Storage(_))
    }
}

/// Failure of a checkout request.
///
/// `EmptyCart`, `NoSession`, and `Busy` are rejected before anything is
/// persisted. `Storage` means the sale is NOT recorded and the cart is left
/// intact so the operator can retry. A sync failure is never a checkout
/// failure and has no variant here.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("No active session; sign in before completing a sale")]
    NoSession,

    #[error("Another checkout is already in progress")]
    Busy,

    #[error("Could not record sale: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_not_retryable() {
        let remote = SyncError::Server {
            status: 503,
            message: "Sales ledger server error".into(),
        };
        assert!(remote.is_retryable());

        let local = SyncError::Storage(StorageError::Query {
            context: "mark sale synced",
            reason: "disk I/O error".into(),
        });
        assert!(!local.is_retryable());
    }
}
