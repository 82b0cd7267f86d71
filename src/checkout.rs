//! Checkout orchestration: validate, persist, submit, commit.
//!
//! The durability boundary sits at the local append. Once the sale row is on
//! disk the checkout can no longer fail; remote submission is opportunistic,
//! and any failure there leaves the sale queued for the reconciler. Only a
//! local storage failure aborts a checkout, and that path leaves the cart
//! untouched so the operator can retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cart::Cart;
use crate::db::SaleStore;
use crate::error::CheckoutError;
use crate::model::{PaymentMethod, SaleRecord};
use crate::network::NetworkMonitor;
use crate::session::SessionState;
use crate::sync::SyncReconciler;

pub struct CheckoutOrchestrator {
    store: Arc<SaleStore>,
    reconciler: Arc<SyncReconciler>,
    monitor: Arc<NetworkMonitor>,
    sessions: Arc<SessionState>,
    terminal_id: String,
    is_processing: AtomicBool,
}

/// Releases the busy flag on every exit path, including cancellation.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CheckoutOrchestrator {
    pub fn new(
        store: Arc<SaleStore>,
        reconciler: Arc<SyncReconciler>,
        monitor: Arc<NetworkMonitor>,
        sessions: Arc<SessionState>,
        terminal_id: String,
    ) -> Self {
        Self {
            store,
            reconciler,
            monitor,
            sessions,
            terminal_id,
            is_processing: AtomicBool::new(false),
        }
    }

    /// Turn the cart into a durable sale.
    ///
    /// Runs validate, persist, submit, commit in that order. The cart is
    /// cleared only after the sale row is durable; a storage failure returns
    /// with the cart exactly as it was, plus an error note for the UI.
    pub async fn checkout(
        &self,
        cart: &Mutex<Cart>,
        payment_method: PaymentMethod,
    ) -> Result<SaleRecord, CheckoutError> {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CheckoutError::Busy);
        }
        let _guard = ProcessingGuard(&self.is_processing);

        // Validate
        let session = self.sessions.current().ok_or(CheckoutError::NoSession)?;
        let (items, total_amount) = {
            let cart = cart.lock().unwrap();
            (cart.snapshot(), cart.total_amount())
        };
        if items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        // Persist
        let now = Utc::now();
        let mut record = SaleRecord {
            sale_id: Uuid::new_v4().to_string(),
            timestamp: now.timestamp(),
            items,
            total_amount,
            payment_method,
            terminal_id: self.terminal_id.clone(),
            employee_number: Some(session.employee_number.clone()),
            event_id: session.event_id.clone(),
            synced: false,
            created_at: now,
            synced_at: None,
            sync_attempts: 0,
            last_sync_error: None,
        };

        if let Err(e) = self.store.append_sale(&record) {
            let err = CheckoutError::from(e);
            cart.lock().unwrap().set_error(err.to_string());
            return Err(err);
        }
        debug!(sale_id = %record.sale_id, total = record.total_amount, "sale recorded locally");

        // Submit (best effort; the sale is already durable)
        if self.monitor.status().is_online() {
            match self.reconciler.submit(&record).await {
                Ok(_) => {
                    record.synced = true;
                    record.synced_at = Some(Utc::now());
                }
                Err(e) => {
                    warn!(
                        sale_id = %record.sale_id,
                        error = %e,
                        "immediate submission failed; sale stays queued"
                    );
                }
            }
        } else {
            debug!(sale_id = %record.sale_id, "offline; sale queued for later sync");
        }

        // Commit
        cart.lock().unwrap().clear();
        info!(
            sale_id = %record.sale_id,
            total = record.total_amount,
            method = %record.payment_method,
            synced = record.synced,
            "sale committed"
        );
        Ok(record)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
