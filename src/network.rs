//! Network reachability tracking.
//!
//! A single watch channel carries the Online/Offline flag for the whole
//! process. The connectivity probe loop writes to it. Checkout reads it to
//! decide between immediate submission and queue-only, and the online-drain
//! task reacts to the offline-to-online transition by draining the backlog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::sync::{DrainOutcome, SyncReconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        matches!(self, NetworkStatus::Online)
    }
}

/// Checks whether the sales ledger is reachable right now.
///
/// [`crate::api::HttpLedger`] implements this with a HEAD request against
/// its health endpoint.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Process-wide reachability state.
///
/// Readers never block writers. Subscribers are woken only when the status
/// actually changes, so a probe re-reporting the same state is silent.
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkStatus>,
    last_online: Mutex<Option<DateTime<Utc>>>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            last_online: Mutex::new(None),
        }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// Report a probe result. Transitions are logged and broadcast;
    /// re-reporting the current state only refreshes the last-online
    /// timestamp.
    pub fn set_status(&self, status: NetworkStatus) {
        if status.is_online() {
            if let Ok(mut guard) = self.last_online.lock() {
                *guard = Some(Utc::now());
            }
        }

        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });

        if changed {
            match status {
                NetworkStatus::Online => info!("Network restored; resuming queued sync"),
                NetworkStatus::Offline => {
                    info!("Network offline; deferring remote sync and keeping queue pending")
                }
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// When the ledger was last confirmed reachable, if ever.
    pub fn last_online(&self) -> Option<DateTime<Utc>> {
        self.last_online.lock().ok().and_then(|g| *g)
    }
}

impl Default for NetworkMonitor {
    /// Starts offline; the first successful probe flips it.
    fn default() -> Self {
        Self::new(NetworkStatus::Offline)
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Drain the backlog whenever the network comes back.
///
/// The task exits when the monitor is dropped. It holds only a receiver, so
/// it never keeps the monitor alive on its own.
pub fn spawn_online_drain(
    monitor: &NetworkMonitor,
    reconciler: Arc<SyncReconciler>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = monitor.subscribe();
    tokio::spawn(async move {
        // Mark the current value seen; only transitions from here on count.
        let _ = *rx.borrow_and_update();

        while rx.changed().await.is_ok() {
            if !rx.borrow_and_update().is_online() {
                continue;
            }
            match reconciler.drain().await {
                Ok(DrainOutcome::Completed(report)) if report.attempted > 0 => {
                    info!(
                        synced = report.synced,
                        failed = report.failed,
                        "post-reconnect drain complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "post-reconnect drain failed"),
            }
        }
        debug!("online drain task exiting; monitor dropped");
    })
}

/// Handle for stopping a background probe loop.
pub struct ProbeLoopHandle {
    running: Arc<AtomicBool>,
}

impl ProbeLoopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Start the periodic connectivity probe. The first probe runs immediately
/// so startup reaches a truthful state without waiting out an interval.
pub fn spawn_probe_loop(
    monitor: Arc<NetworkMonitor>,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> ProbeLoopHandle {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();

    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "connectivity probe loop started"
        );
        loop {
            if !flag.load(Ordering::SeqCst) {
                break;
            }
            let reachable = probe.is_reachable().await;
            monitor.set_status(if reachable {
                NetworkStatus::Online
            } else {
                NetworkStatus::Offline
            });
            tokio::time::sleep(interval).await;
        }
        info!("connectivity probe loop stopped");
    });

    ProbeLoopHandle { running }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, SaleStore};
    use crate::error::SyncError;
    use crate::model::{LedgerAck, LineItem, PaymentMethod, SaleRecord};
    use crate::sync::SalesLedger;
    use std::sync::atomic::AtomicUsize;

    fn sample_record(sale_id: &str) -> SaleRecord {
        let now = Utc::now();
        SaleRecord {
            sale_id: sale_id.into(),
            timestamp: now.timestamp(),
            items: vec![LineItem {
                product_id: "prod-a".into(),
                product_name: None,
                unit_price: 500,
                quantity: 1,
            }],
            total_amount: 500,
            payment_method: PaymentMethod::Cash,
            terminal_id: "term-1".into(),
            employee_number: None,
            event_id: None,
            synced: false,
            created_at: now,
            synced_at: None,
            sync_attempts: 0,
            last_sync_error: None,
        }
    }

    /// Ledger fake that accepts everything and counts calls.
    #[derive(Default)]
    struct CountingLedger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SalesLedger for CountingLedger {
        async fn record_sale(&self, record: &SaleRecord) -> Result<LedgerAck, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LedgerAck {
                sale_id: record.sale_id.clone(),
                status: "completed".into(),
            })
        }
    }

    /// Probe fake backed by a shared flag.
    struct FlagProbe {
        reachable: AtomicBool,
    }

    #[async_trait]
    impl ConnectivityProbe for FlagProbe {
        async fn is_reachable(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }
    }

    fn reconciler_with_pending(count: usize) -> (Arc<SyncReconciler>, Arc<SaleStore>) {
        let store = Arc::new(db::open_in_memory_for_test());
        for i in 0..count {
            store
                .append_sale(&sample_record(&format!("sale-{i}")))
                .expect("append");
        }
        let ledger = Arc::new(CountingLedger::default());
        (
            Arc::new(SyncReconciler::new(store.clone(), ledger)),
            store,
        )
    }

    async fn wait_until_drained(store: &SaleStore) -> bool {
        for _ in 0..200 {
            if store.unsynced_count().unwrap() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn subscribers_wake_only_on_transitions() {
        let monitor = NetworkMonitor::new(NetworkStatus::Offline);
        let mut rx = monitor.subscribe();
        let _ = *rx.borrow_and_update();

        monitor.set_status(NetworkStatus::Offline);
        assert!(!rx.has_changed().unwrap());

        monitor.set_status(NetworkStatus::Online);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), NetworkStatus::Online);
        assert_eq!(monitor.status(), NetworkStatus::Online);

        monitor.set_status(NetworkStatus::Online);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn last_online_refreshes_even_without_a_transition() {
        let monitor = NetworkMonitor::new(NetworkStatus::Offline);
        assert!(monitor.last_online().is_none());

        monitor.set_status(NetworkStatus::Online);
        let first = monitor.last_online().expect("online once");

        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.set_status(NetworkStatus::Online);
        let second = monitor.last_online().expect("still online");

        assert!(second > first);

        monitor.set_status(NetworkStatus::Offline);
        assert_eq!(monitor.last_online(), Some(second));
    }

    #[tokio::test]
    async fn coming_online_drains_the_backlog() {
        let (reconciler, store) = reconciler_with_pending(2);
        let monitor = NetworkMonitor::new(NetworkStatus::Offline);
        let _task = spawn_online_drain(&monitor, reconciler.clone());

        // Still offline: nothing moves.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.unsynced_count().unwrap(), 2);

        monitor.set_status(NetworkStatus::Online);
        assert!(wait_until_drained(&store).await);

        // A later outage and recovery drains whatever queued meanwhile.
        monitor.set_status(NetworkStatus::Offline);
        store.append_sale(&sample_record("sale-late")).unwrap();
        monitor.set_status(NetworkStatus::Online);
        assert!(wait_until_drained(&store).await);
    }

    #[tokio::test]
    async fn probe_loop_drives_the_monitor() {
        let monitor = Arc::new(NetworkMonitor::new(NetworkStatus::Offline));
        let probe = Arc::new(FlagProbe {
            reachable: AtomicBool::new(true),
        });

        let handle = spawn_probe_loop(
            monitor.clone(),
            probe.clone(),
            Duration::from_millis(10),
        );

        let mut online = false;
        for _ in 0..100 {
            if monitor.status().is_online() {
                online = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(online, "probe success should flip the monitor online");

        probe.reachable.store(false, Ordering::SeqCst);
        let mut offline = false;
        for _ in 0..100 {
            if !monitor.status().is_online() {
                offline = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(offline, "probe failure should flip the monitor offline");

        handle.stop();
        assert!(!handle.is_running());
    }
}
