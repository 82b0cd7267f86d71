//! Sync reconciler: moves locally recorded sales to the remote ledger.
//!
//! Every sale lands in the local store first with `synced = 0`; this module
//! takes the unsynced set to empty without losing or duplicating anything.
//! Duplicate protection comes from the sale id travelling as the idempotency
//! key, so replaying a submission after a lost acknowledgement is always
//! safe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::SaleStore;
use crate::error::{StorageError, SyncError};
use crate::model::{LedgerAck, SaleRecord};
use crate::network::{NetworkMonitor, NetworkStatus};

/// The remote "record sale" operation.
///
/// Implementations must be idempotent under replay of the same sale id;
/// [`crate::api::HttpLedger`] achieves this with the `Idempotency-Key`
/// header.
#[async_trait]
pub trait SalesLedger: Send + Sync {
    async fn record_sale(&self, record: &SaleRecord) -> Result<LedgerAck, SyncError>;
}

/// Tally of one completed drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
}

/// What a drain request observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A pass ran to completion (possibly over an empty queue).
    Completed(DrainReport),
    /// Another drain held the guard; this request did nothing. Records it
    /// would have covered are picked up by the next invocation.
    AlreadyRunning,
}

/// Counts and drain state for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusSnapshot {
    pub total_sales: i64,
    pub pending_sales: i64,
    pub drain_in_progress: bool,
    pub last_drain_at: Option<DateTime<Utc>>,
}

pub struct SyncReconciler {
    store: Arc<SaleStore>,
    ledger: Arc<dyn SalesLedger>,
    drain_in_progress: AtomicBool,
    last_drain: Mutex<Option<DateTime<Utc>>>,
}

/// Releases the drain guard even when the owning task is cancelled at an
/// await point.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncReconciler {
    pub fn new(store: Arc<SaleStore>, ledger: Arc<dyn SalesLedger>) -> Self {
        Self {
            store,
            ledger,
            drain_in_progress: AtomicBool::new(false),
            last_drain: Mutex::new(None),
        }
    }

    /// Submit one record and finalise the outcome locally.
    ///
    /// Success marks the record synced. Remote failure is noted on the
    /// record's bookkeeping columns and returned; the record stays in the
    /// unsynced set. No path loses the record.
    pub async fn submit(&self, record: &SaleRecord) -> Result<LedgerAck, SyncError> {
        match self.ledger.record_sale(record).await {
            Ok(ack) => {
                self.store.mark_synced(&record.sale_id)?;
                info!(sale_id = %record.sale_id, "sale synced to ledger");
                Ok(ack)
            }
            Err(e) => {
                debug!(sale_id = %record.sale_id, error = %e, "sale submission failed");
                if let Err(note_err) = self
                    .store
                    .note_sync_failure(&record.sale_id, &e.to_string())
                {
                    // Bookkeeping is best effort; the submission error is
                    // the one the caller acts on.
                    warn!(
                        sale_id = %record.sale_id,
                        error = %note_err,
                        "could not record sync failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Drain the unsynced set: sequential submits, oldest first.
    ///
    /// A remote failure skips that record and continues, so one bad record
    /// cannot block the rest. A local storage failure aborts the pass and is
    /// surfaced. Reentrant calls coalesce: whoever holds the guard drains,
    /// everyone else gets [`DrainOutcome::AlreadyRunning`].
    pub async fn drain(&self) -> Result<DrainOutcome, StorageError> {
        if self.drain_in_progress.swap(true, Ordering::SeqCst) {
            debug!("drain already in progress; coalescing");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.drain_in_progress);

        let report = self.run_drain().await?;

        if let Ok(mut guard) = self.last_drain.lock() {
            *guard = Some(Utc::now());
        }
        Ok(DrainOutcome::Completed(report))
    }

    async fn run_drain(&self) -> Result<DrainReport, StorageError> {
        let pending = self.store.list_unsynced()?;
        if pending.is_empty() {
            debug!("drain: nothing pending");
            return Ok(DrainReport {
                attempted: 0,
                synced: 0,
                failed: 0,
            });
        }

        info!(pending = pending.len(), "draining unsynced sales");
        let mut report = DrainReport {
            attempted: 0,
            synced: 0,
            failed: 0,
        };

        for record in &pending {
            report.attempted += 1;
            match self.submit(record).await {
                Ok(_) => report.synced += 1,
                Err(SyncError::Storage(e)) => {
                    error!(
                        sale_id = %record.sale_id,
                        error = %e,
                        "drain aborted on storage failure"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        sale_id = %record.sale_id,
                        error = %e,
                        "sale submission failed; will retry on a later drain"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            "drain pass complete"
        );
        Ok(report)
    }

    /// Snapshot for status indicators: backlog counts, whether a drain is
    /// running, and when the last pass finished.
    pub fn status(&self) -> Result<SyncStatusSnapshot, StorageError> {
        Ok(SyncStatusSnapshot {
            total_sales: self.store.sale_count()?,
            pending_sales: self.store.unsynced_count()?,
            drain_in_progress: self.drain_in_progress.load(Ordering::SeqCst),
            last_drain_at: self.last_drain.lock().ok().and_then(|g| *g),
        })
    }
}

// ---------------------------------------------------------------------------
// Background drain loop
// ---------------------------------------------------------------------------

/// Handle for stopping a background drain loop.
pub struct DrainLoopHandle {
    running: Arc<AtomicBool>,
}

impl DrainLoopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Start the periodic background drain: one pass every `interval` while the
/// network is up.
///
/// This complements the online-transition trigger, catching sales whose
/// submission failed while the network stayed nominally online (server
/// errors, timeouts).
pub fn spawn_drain_loop(
    reconciler: Arc<SyncReconciler>,
    monitor: Arc<NetworkMonitor>,
    interval: Duration,
) -> DrainLoopHandle {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "drain loop started");
        loop {
            tokio::time::sleep(interval).await;

            if !flag.load(Ordering::SeqCst) {
                info!("drain loop stopped");
                break;
            }

            if monitor.status() == NetworkStatus::Offline {
                debug!("drain loop: offline, keeping queue pending");
                continue;
            }

            match reconciler.drain().await {
                Ok(DrainOutcome::Completed(report)) if report.attempted > 0 => {
                    info!(
                        synced = report.synced,
                        failed = report.failed,
                        "periodic drain complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "periodic drain failed"),
            }
        }
    });

    DrainLoopHandle { running }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::{LineItem, PaymentMethod};
    use std::collections::HashSet;
    use tokio::sync::Notify;

    fn sample_record(sale_id: &str, created_at: DateTime<Utc>) -> SaleRecord {
        SaleRecord {
            sale_id: sale_id.into(),
            timestamp: created_at.timestamp(),
            items: vec![LineItem {
                product_id: "prod-a".into(),
                product_name: None,
                unit_price: 500,
                quantity: 1,
            }],
            total_amount: 500,
            payment_method: PaymentMethod::Cash,
            terminal_id: "term-1".into(),
            employee_number: Some("1234567".into()),
            event_id: None,
            synced: false,
            created_at,
            synced_at: None,
            sync_attempts: 0,
            last_sync_error: None,
        }
    }

    /// Ledger fake that records call order and can fail or stall on demand.
    #[derive(Default)]
    struct RecordingLedger {
        calls: Mutex<Vec<String>>,
        fail: Mutex<HashSet<String>>,
        hold: Mutex<Option<Arc<Notify>>>,
    }

    impl RecordingLedger {
        fn fail_on(&self, sale_id: &str) {
            self.fail.lock().unwrap().insert(sale_id.to_string());
        }

        fn hold_on(&self, gate: Arc<Notify>) {
            *self.hold.lock().unwrap() = Some(gate);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SalesLedger for RecordingLedger {
        async fn record_sale(&self, record: &SaleRecord) -> Result<LedgerAck, SyncError> {
            self.calls.lock().unwrap().push(record.sale_id.clone());
            let gate = self.hold.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail.lock().unwrap().contains(&record.sale_id) {
                return Err(SyncError::Server {
                    status: 503,
                    message: "Sales ledger server error (HTTP 503)".into(),
                });
            }
            Ok(LedgerAck {
                sale_id: record.sale_id.clone(),
                status: "completed".into(),
            })
        }
    }

    fn reconciler_with(
        records: &[SaleRecord],
    ) -> (Arc<SyncReconciler>, Arc<SaleStore>, Arc<RecordingLedger>) {
        let store = Arc::new(db::open_in_memory_for_test());
        for record in records {
            store.append_sale(record).expect("append");
        }
        let ledger = Arc::new(RecordingLedger::default());
        let reconciler = Arc::new(SyncReconciler::new(store.clone(), ledger.clone()));
        (reconciler, store, ledger)
    }

    #[tokio::test]
    async fn submit_success_marks_record_synced() {
        let record = sample_record("sale-1", Utc::now());
        let (reconciler, store, ledger) = reconciler_with(&[record.clone()]);

        let ack = reconciler.submit(&record).await.expect("submit");
        assert_eq!(ack.sale_id, "sale-1");
        assert_eq!(ledger.calls(), ["sale-1"]);

        let stored = store.get_sale("sale-1").unwrap().unwrap();
        assert!(stored.synced);
        assert!(stored.synced_at.is_some());
    }

    #[tokio::test]
    async fn submit_failure_keeps_record_pending() {
        let record = sample_record("sale-1", Utc::now());
        let (reconciler, store, ledger) = reconciler_with(&[record.clone()]);
        ledger.fail_on("sale-1");

        let err = reconciler.submit(&record).await.expect_err("should fail");
        assert!(err.is_retryable());

        let stored = store.get_sale("sale-1").unwrap().unwrap();
        assert!(!stored.synced);
        assert_eq!(stored.sync_attempts, 1);
        assert!(stored
            .last_sync_error
            .as_deref()
            .unwrap()
            .contains("HTTP 503"));
    }

    #[tokio::test]
    async fn drain_submits_oldest_first_and_empties_the_queue() {
        let base = Utc::now();
        let records = [
            sample_record("sale-b", base + chrono::Duration::seconds(1)),
            sample_record("sale-a", base),
            sample_record("sale-c", base + chrono::Duration::seconds(2)),
        ];
        let (reconciler, store, ledger) = reconciler_with(&records);

        let outcome = reconciler.drain().await.expect("drain");
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainReport {
                attempted: 3,
                synced: 3,
                failed: 0,
            })
        );
        assert_eq!(ledger.calls(), ["sale-a", "sale-b", "sale-c"]);
        assert!(store.list_unsynced().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_skips_failing_record_and_continues() {
        let base = Utc::now();
        let records = [
            sample_record("sale-a", base),
            sample_record("sale-b", base + chrono::Duration::seconds(1)),
            sample_record("sale-c", base + chrono::Duration::seconds(2)),
        ];
        let (reconciler, store, ledger) = reconciler_with(&records);
        ledger.fail_on("sale-b");

        let outcome = reconciler.drain().await.expect("drain");
        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainReport {
                attempted: 3,
                synced: 2,
                failed: 1,
            })
        );

        // Only the failed record remains; the next pass retries just it.
        let pending = store.list_unsynced().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sale_id, "sale-b");
    }

    #[tokio::test]
    async fn repeat_drain_does_not_resubmit_synced_records() {
        let record = sample_record("sale-1", Utc::now());
        let (reconciler, _store, ledger) = reconciler_with(&[record]);

        reconciler.drain().await.expect("first drain");
        let outcome = reconciler.drain().await.expect("second drain");

        assert_eq!(
            outcome,
            DrainOutcome::Completed(DrainReport {
                attempted: 0,
                synced: 0,
                failed: 0,
            })
        );
        // Exactly one ledger call ever happened for the sale.
        assert_eq!(ledger.calls(), ["sale-1"]);
    }

    #[tokio::test]
    async fn concurrent_drain_requests_coalesce() {
        let record = sample_record("sale-1", Utc::now());
        let (reconciler, _store, ledger) = reconciler_with(&[record]);

        let gate = Arc::new(Notify::new());
        ledger.hold_on(gate.clone());

        let background = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.drain().await })
        };

        // Wait for the background drain to reach the (stalled) ledger call.
        while ledger.calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = reconciler.drain().await.expect("second drain");
        assert_eq!(second, DrainOutcome::AlreadyRunning);
        assert!(reconciler.status().unwrap().drain_in_progress);

        gate.notify_one();
        let first = background.await.expect("join").expect("drain");
        assert_eq!(
            first,
            DrainOutcome::Completed(DrainReport {
                attempted: 1,
                synced: 1,
                failed: 0,
            })
        );

        // Guard released: a later drain runs (and finds nothing).
        let third = reconciler.drain().await.expect("third drain");
        assert_eq!(
            third,
            DrainOutcome::Completed(DrainReport {
                attempted: 0,
                synced: 0,
                failed: 0,
            })
        );
    }

    #[tokio::test]
    async fn drain_aborts_on_storage_failure() {
        let record = sample_record("sale-1", Utc::now());
        let (reconciler, store, ledger) = reconciler_with(&[record]);

        let gate = Arc::new(Notify::new());
        ledger.hold_on(gate.clone());

        let background = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.drain().await })
        };
        while ledger.calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Break the store mid-drain; the pass must abort and surface it.
        {
            let conn = store.conn.lock().unwrap();
            conn.execute_batch("DROP TABLE sales;").unwrap();
        }
        gate.notify_one();

        let result = background.await.expect("join");
        assert!(result.is_err(), "expected storage failure, got {result:?}");

        // The guard is released even on the error path.
        assert!(!reconciler.drain_in_progress.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn status_reflects_backlog_and_last_drain() {
        let base = Utc::now();
        let records = [
            sample_record("sale-a", base),
            sample_record("sale-b", base + chrono::Duration::seconds(1)),
        ];
        let (reconciler, _store, _ledger) = reconciler_with(&records);

        let before = reconciler.status().expect("status");
        assert_eq!(before.total_sales, 2);
        assert_eq!(before.pending_sales, 2);
        assert!(!before.drain_in_progress);
        assert!(before.last_drain_at.is_none());

        reconciler.drain().await.expect("drain");

        let after = reconciler.status().expect("status");
        assert_eq!(after.total_sales, 2);
        assert_eq!(after.pending_sales, 0);
        assert!(after.last_drain_at.is_some());
    }

    #[tokio::test]
    async fn periodic_drain_loop_respects_network_state() {
        let record = sample_record("sale-1", Utc::now());
        let (reconciler, store, _ledger) = reconciler_with(&[record]);
        let monitor = Arc::new(NetworkMonitor::new(NetworkStatus::Offline));

        let handle = spawn_drain_loop(
            reconciler.clone(),
            monitor.clone(),
            Duration::from_millis(10),
        );

        // Offline: several intervals pass without draining.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.unsynced_count().unwrap(), 1);

        // Online: the next tick drains.
        monitor.set_status(NetworkStatus::Online);
        let mut drained = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.unsynced_count().unwrap() == 0 {
                drained = true;
                break;
            }
        }
        assert!(drained, "periodic loop should drain once online");

        handle.stop();
        assert!(!handle.is_running());
    }
}
