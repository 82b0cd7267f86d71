//! Local durable store for sales.
//!
//! Uses rusqlite with WAL mode. A sale that `append_sale` has accepted
//! survives process kill and power loss; the set of rows with `synced = 0`
//! is the offline queue, so there is no separate queue table to drift out
//! of agreement with the sales themselves.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, error, info, warn};

use crate::error::StorageError;
use crate::model::{LineItem, PaymentMethod, SaleRecord};

/// Shared state holding the database connection.
pub struct SaleStore {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Column list shared by every query that reads full sale rows.
const SALE_COLUMNS: &str = "sale_id, timestamp, items, total_amount, payment_method, terminal_id, \
     employee_number, event_id, synced, created_at, synced_at, sync_attempts, last_sync_error";

impl SaleStore {
    /// Open (or create) the database at `{data_dir}/fairpos.db`, apply
    /// pragmas, and run any pending migrations.
    ///
    /// An open failure is surfaced as-is. The file may hold sales that have
    /// not reached the ledger yet, so no recovery path here is allowed to
    /// delete or recreate it.
    pub fn open(data_dir: &Path) -> Result<SaleStore, StorageError> {
        fs::create_dir_all(data_dir).map_err(|e| StorageError::Open {
            path: data_dir.display().to_string(),
            reason: format!("create data dir: {e}"),
        })?;

        let db_path = data_dir.join("fairpos.db");
        info!("Opening sales database at {}", db_path.display());

        let conn = open_and_configure(&db_path)?;
        run_migrations(&conn)?;

        info!("Sales database ready (schema v{CURRENT_SCHEMA_VERSION})");

        Ok(SaleStore {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Append a completed sale. This is the durability boundary: once this
    /// returns `Ok`, the sale survives process kill and is eligible for sync.
    pub fn append_sale(&self, record: &SaleRecord) -> Result<(), StorageError> {
        let items_json = serde_json::to_string(&record.items).map_err(|e| StorageError::Query {
            context: "serialize sale items",
            reason: e.to_string(),
        })?;

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sales (sale_id, timestamp, items, total_amount, payment_method, \
             terminal_id, employee_number, event_id, synced, created_at, synced_at, \
             sync_attempts, last_sync_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.sale_id,
                record.timestamp,
                items_json,
                record.total_amount,
                record.payment_method.as_str(),
                record.terminal_id,
                record.employee_number,
                record.event_id,
                record.synced,
                rfc3339(record.created_at),
                record.synced_at.map(rfc3339),
                record.sync_attempts,
                record.last_sync_error,
            ],
        )
        .map_err(|e| StorageError::query("insert sale", e))?;

        debug!(
            sale_id = %record.sale_id,
            total_amount = record.total_amount,
            "sale appended"
        );
        Ok(())
    }

    /// Flip a sale to synced. Idempotent: marking an already-synced sale is
    /// a no-op and `synced_at` keeps its original value; an unknown id is
    /// logged and accepted.
    pub fn mark_synced(&self, sale_id: &str) -> Result<(), StorageError> {
        let now = rfc3339(Utc::now());
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE sales SET synced = 1, synced_at = COALESCE(synced_at, ?1), \
                 last_sync_error = NULL WHERE sale_id = ?2",
                params![now, sale_id],
            )
            .map_err(|e| StorageError::query("mark sale synced", e))?;

        if updated == 0 {
            warn!(sale_id, "mark_synced: no such sale");
        }
        Ok(())
    }

    /// All sales awaiting sync, oldest first, so long-waiting sales drain
    /// before fresh ones. Each call re-scans, so a caller can restart after
    /// a partial pass without bookkeeping.
    ///
    /// A row that no longer decodes is surfaced as
    /// [`StorageError::CorruptRecord`], never silently dropped.
    pub fn list_unsynced(&self) -> Result<Vec<SaleRecord>, StorageError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SALE_COLUMNS} FROM sales WHERE synced = 0 \
                 ORDER BY created_at ASC, rowid ASC"
            ))
            .map_err(|e| StorageError::query("prepare unsynced scan", e))?;

        let rows = stmt
            .query_map([], raw_sale_from_row)
            .map_err(|e| StorageError::query("scan unsynced sales", e))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StorageError::query("read unsynced sale row", e))?;
            records.push(decode_sale(raw)?);
        }
        Ok(records)
    }

    /// Record a failed submission attempt. Diagnostics only; never consulted
    /// when deciding what to drain. Skips sales that synced in the meantime.
    pub fn note_sync_failure(&self, sale_id: &str, error: &str) -> Result<(), StorageError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE sales SET sync_attempts = sync_attempts + 1, last_sync_error = ?1 \
             WHERE sale_id = ?2 AND synced = 0",
            params![error, sale_id],
        )
        .map_err(|e| StorageError::query("record sync failure", e))?;
        Ok(())
    }

    /// Look up one sale by id.
    pub fn get_sale(&self, sale_id: &str) -> Result<Option<SaleRecord>, StorageError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SALE_COLUMNS} FROM sales WHERE sale_id = ?1"
            ))
            .map_err(|e| StorageError::query("prepare sale lookup", e))?;

        let mut rows = stmt
            .query_map(params![sale_id], raw_sale_from_row)
            .map_err(|e| StorageError::query("look up sale", e))?;

        match rows.next() {
            Some(row) => {
                let raw = row.map_err(|e| StorageError::query("read sale row", e))?;
                Ok(Some(decode_sale(raw)?))
            }
            None => Ok(None),
        }
    }

    /// Most recent sales, newest first, for history views.
    pub fn list_recent(&self, limit: u32) -> Result<Vec<SaleRecord>, StorageError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SALE_COLUMNS} FROM sales \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1"
            ))
            .map_err(|e| StorageError::query("prepare recent scan", e))?;

        let rows = stmt
            .query_map(params![limit], raw_sale_from_row)
            .map_err(|e| StorageError::query("scan recent sales", e))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StorageError::query("read recent sale row", e))?;
            records.push(decode_sale(raw)?);
        }
        Ok(records)
    }

    /// Number of sales awaiting sync.
    pub fn unsynced_count(&self) -> Result<i64, StorageError> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT COUNT(*) FROM sales WHERE synced = 0", [], |row| {
            row.get(0)
        })
        .map_err(|e| StorageError::query("count unsynced sales", e))
    }

    /// Total number of recorded sales.
    pub fn sale_count(&self) -> Result<i64, StorageError> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))
            .map_err(|e| StorageError::query("count sales", e))
    }

    /// Applied schema version, for diagnostics.
    pub fn schema_version(&self) -> Result<i32, StorageError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::query("read schema version", e))
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|e| StorageError::Query {
            context: "acquire database lock",
            reason: e.to_string(),
        })
    }
}

/// Canonical timestamp encoding for the store: RFC 3339 UTC with fixed
/// microsecond precision, so lexicographic order is chronological order.
fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, StorageError> {
    let conn = Connection::open(path).map_err(|e| StorageError::Open {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| StorageError::Open {
        path: path.display().to_string(),
        reason: format!("pragma setup: {e}"),
    })?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| StorageError::Migration {
        version: 0,
        reason: format!("create schema_version: {e}"),
    })?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Sales database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating sales database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: the sales table.
fn migrate_v1(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        -- sales: one row per completed sale; rows with synced = 0 ARE the
        -- offline queue
        CREATE TABLE IF NOT EXISTS sales (
            sale_id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            items TEXT NOT NULL DEFAULT '[]',
            total_amount INTEGER NOT NULL DEFAULT 0,
            payment_method TEXT NOT NULL DEFAULT 'cash'
                CHECK (payment_method IN ('cash', 'card', 'other')),
            terminal_id TEXT NOT NULL,
            employee_number TEXT,
            event_id TEXT,
            synced INTEGER NOT NULL DEFAULT 0 CHECK (synced IN (0, 1)),
            created_at TEXT NOT NULL,
            synced_at TEXT
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_sales_synced ON sales(synced);
        CREATE INDEX IF NOT EXISTS idx_sales_created_at ON sales(created_at);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        StorageError::Migration {
            version: 1,
            reason: e.to_string(),
        }
    })?;

    info!("Applied migration v1 (sales table)");
    Ok(())
}

/// Migration v2: sync attempt bookkeeping.
///
/// Adds `sync_attempts` and `last_sync_error` so operators can see why a
/// sale is still pending, plus a partial index covering the drain scan.
fn migrate_v2(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        ALTER TABLE sales ADD COLUMN sync_attempts INTEGER NOT NULL DEFAULT 0;

        ALTER TABLE sales ADD COLUMN last_sync_error TEXT;

        CREATE INDEX IF NOT EXISTS idx_sales_unsynced_created
            ON sales(created_at) WHERE synced = 0;

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        StorageError::Migration {
            version: 2,
            reason: e.to_string(),
        }
    })?;

    info!("Applied migration v2 (sync attempt bookkeeping)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Raw column values before fallible decoding.
struct RawSale {
    sale_id: String,
    timestamp: i64,
    items: String,
    total_amount: i64,
    payment_method: String,
    terminal_id: String,
    employee_number: Option<String>,
    event_id: Option<String>,
    synced: bool,
    created_at: String,
    synced_at: Option<String>,
    sync_attempts: u32,
    last_sync_error: Option<String>,
}

fn raw_sale_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSale> {
    Ok(RawSale {
        sale_id: row.get(0)?,
        timestamp: row.get(1)?,
        items: row.get(2)?,
        total_amount: row.get(3)?,
        payment_method: row.get(4)?,
        terminal_id: row.get(5)?,
        employee_number: row.get(6)?,
        event_id: row.get(7)?,
        synced: row.get(8)?,
        created_at: row.get(9)?,
        synced_at: row.get(10)?,
        sync_attempts: row.get(11)?,
        last_sync_error: row.get(12)?,
    })
}

fn decode_sale(raw: RawSale) -> Result<SaleRecord, StorageError> {
    let items: Vec<LineItem> =
        serde_json::from_str(&raw.items).map_err(|e| StorageError::CorruptRecord {
            sale_id: raw.sale_id.clone(),
            reason: format!("items column: {e}"),
        })?;

    let payment_method: PaymentMethod =
        raw.payment_method
            .parse()
            .map_err(|e: String| StorageError::CorruptRecord {
                sale_id: raw.sale_id.clone(),
                reason: e,
            })?;

    let created_at = parse_timestamp(&raw.sale_id, "created_at", &raw.created_at)?;
    let synced_at = match raw.synced_at.as_deref() {
        Some(s) => Some(parse_timestamp(&raw.sale_id, "synced_at", s)?),
        None => None,
    };

    Ok(SaleRecord {
        sale_id: raw.sale_id,
        timestamp: raw.timestamp,
        items,
        total_amount: raw.total_amount,
        payment_method,
        terminal_id: raw.terminal_id,
        employee_number: raw.employee_number,
        event_id: raw.event_id,
        synced: raw.synced,
        created_at,
        synced_at,
        sync_attempts: raw.sync_attempts,
        last_sync_error: raw.last_sync_error,
    })
}

fn parse_timestamp(
    sale_id: &str,
    column: &str,
    value: &str,
) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRecord {
            sale_id: sale_id.to_string(),
            reason: format!("{column} column: {e}"),
        })
}

/// Open an in-memory store with migrations applied (test helper, not
/// public API).
#[cfg(test)]
pub(crate) fn open_in_memory_for_test() -> SaleStore {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    SaleStore {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
