//! Offline-first sales core for point-of-sale terminals.
//!
//! Sales commit to local SQLite before any network activity. A background
//! reconciler drains the unsynced queue to the remote sales ledger whenever
//! connectivity allows, with the sale id doubling as the idempotency key so
//! retries never create duplicates.
//!
//! Expected wiring at startup:
//! 1. Call [`init_tracing`] once.
//! 2. Open a [`SaleStore`], build an [`HttpLedger`] and a [`SyncReconciler`].
//! 3. Start the connectivity probe loop, the online-drain task, and the
//!    periodic drain loop.
//! 4. Route sales through a [`CheckoutOrchestrator`].

use std::path::Path;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod network;
pub mod session;
pub mod sync;
pub mod terminal;

pub use api::{AuthHeaderProvider, HttpLedger, NoAuth};
pub use cart::Cart;
pub use checkout::CheckoutOrchestrator;
pub use config::CoreConfig;
pub use db::SaleStore;
pub use error::{CheckoutError, StorageError, SyncError};
pub use model::{LedgerAck, LineItem, PaymentMethod, Product, SaleRecord, SessionContext};
pub use network::{ConnectivityProbe, NetworkMonitor, NetworkStatus};
pub use session::SessionState;
pub use sync::{DrainOutcome, DrainReport, SalesLedger, SyncReconciler, SyncStatusSnapshot};
pub use terminal::terminal_id;

/// Initialize structured logging (console, plus a rolling daily file when a
/// log directory is given). Call once at process startup.
///
/// The filter honours `RUST_LOG` and defaults to `info` with debug detail
/// for this crate.
pub fn init_tracing(log_dir: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fairpos_core=debug"));

    let file_layer = log_dir.map(|dir| {
        // Prune old log files before setting up the appender
        diagnostics::prune_old_logs(dir);
        std::fs::create_dir_all(dir).ok();

        let file_appender = tracing_appender::rolling::daily(dir, "fairpos.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Keep the guard alive for the lifetime of the process; dropping it
        // would flush and stop the writer, and logging runs until exit.
        std::mem::forget(guard);

        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
    });

    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "fairpos-core logging initialised"
    );
}
