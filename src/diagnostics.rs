//! Diagnostics surfaces.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Health snapshot**: schema version, sync backlog, network state,
//!   recent sync errors
//! - **Log helpers**: default log directory and pruning, used by `lib.rs`
//!   when configuring rolling log files.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::params;
use serde_json::{json, Value};
use tracing::warn;

use crate::db::SaleStore;
use crate::error::StorageError;
use crate::network::NetworkMonitor;
use crate::sync::SyncReconciler;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// How many recent sync errors the health snapshot carries.
const RECENT_SYNC_ERROR_LIMIT: i64 = 20;

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Health snapshot
// ---------------------------------------------------------------------------

/// Collects the state an operator needs when something looks stuck: backlog
/// counts, network reachability, and the latest sync errors.
pub fn health_snapshot(
    store: &SaleStore,
    monitor: &NetworkMonitor,
    reconciler: &SyncReconciler,
) -> Result<Value, StorageError> {
    let sync = reconciler.status()?;
    let schema_version = store.schema_version()?;
    let db_size = fs::metadata(&store.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "dbSizeBytes": db_size,
        "sync": {
            "totalSales": sync.total_sales,
            "pendingSales": sync.pending_sales,
            "drainInProgress": sync.drain_in_progress,
            "lastDrainAt": sync.last_drain_at,
        },
        "network": {
            "status": monitor.status(),
            "lastOnline": monitor.last_online(),
        },
        "recentSyncErrors": recent_sync_errors(store, RECENT_SYNC_ERROR_LIMIT),
    }))
}

/// Best-effort view of the latest failed submissions. Read leniently: a
/// broken errors list must not take down the health screen.
fn recent_sync_errors(store: &SaleStore, limit: i64) -> Vec<Value> {
    let mut errors = Vec::new();
    let conn = match store.conn.lock() {
        Ok(conn) => conn,
        Err(_) => return errors,
    };
    if let Ok(mut stmt) = conn.prepare(
        "SELECT sale_id, sync_attempts, last_sync_error, created_at FROM sales
         WHERE last_sync_error IS NOT NULL
         ORDER BY created_at DESC LIMIT ?1",
    ) {
        if let Ok(rows) = stmt.query_map(params![limit], |row| {
            Ok(json!({
                "saleId": row.get::<_, String>(0)?,
                "syncAttempts": row.get::<_, i64>(1)?,
                "lastSyncError": row.get::<_, String>(2)?,
                "createdAt": row.get::<_, String>(3)?,
            }))
        }) {
            for row in rows.flatten() {
                errors.push(row);
            }
        }
    }
    errors
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Returns the default log directory (same location used by `lib.rs`).
pub fn default_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("fairpos").join("logs")
}

/// Prune old log files in `log_dir`, keeping only the most recent
/// [`MAX_LOG_FILES`].
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with("fairpos.log") {
                        let modified = entry
                            .metadata()
                            .ok()
                            .and_then(|m| m.modified().ok())
                            .unwrap_or(std::time::UNIX_EPOCH);
                        log_files.push((path, modified));
                    }
                }
            }
        }
    }

    // Sort newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
