//! SQLite cache store, one row per symbol.
//!
//! Layout: `stocks(symbol TEXT PRIMARY KEY, info TEXT NOT NULL, <optional
//! sub-document columns>)`. The value schema has grown additively over time,
//! so opening an older database upgrades it in place with `ALTER TABLE ADD
//! COLUMN`; existing rows are never rewritten or dropped.
//!
//! The store file may be opened by several independent processes. Writes that
//! hit `SQLITE_BUSY`/`SQLITE_LOCKED` retry with a fixed delay up to a bounded
//! attempt count before surfacing [`StoreError::Unavailable`]; plain reads do
//! not retry.

use crate::provider::StockPayload;
use rusqlite::{params, Connection, ErrorCode};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Sub-document columns added after the original single-column schema.
const OPTIONAL_COLUMNS: [&str; 4] = ["recommendations", "dividends", "splits", "balance_sheet"];

const UPSERT_SQL: &str = "
    INSERT INTO stocks (symbol, info, recommendations, dividends, splits, balance_sheet)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(symbol) DO UPDATE SET
        info = excluded.info,
        recommendations = excluded.recommendations,
        dividends = excluded.dividends,
        splits = excluded.splits,
        balance_sheet = excluded.balance_sheet
";

const SELECT_COLUMNS: &str = "info, recommendations, dividends, splits, balance_sheet";

/// Structured error types for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Non-transient storage failure, or lock contention that outlasted the
    /// busy-retry budget.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("no cached entry for '{symbol}'")]
    NotFound { symbol: String },

    #[error("corrupt cache entry for '{symbol}': {reason}")]
    Corrupt { symbol: String, reason: String },
}

/// Busy-retry discipline for writes.
#[derive(Debug, Clone, Copy)]
pub struct BusyRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for BusyRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// The symbol-keyed quote cache.
pub struct QuoteStore {
    conn: Connection,
    path: Option<PathBuf>,
    retry: BusyRetry,
}

impl QuoteStore {
    /// Open (creating and/or upgrading the schema if needed) the store at
    /// `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::bootstrap(conn, Some(path.to_path_buf()))
    }

    /// In-memory store, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::bootstrap(conn, None)
    }

    /// Replace the busy-retry policy (tests use a near-zero delay).
    pub fn with_retry(mut self, retry: BusyRetry) -> Self {
        self.retry = retry;
        self
    }

    fn bootstrap(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS stocks (
                symbol TEXT PRIMARY KEY,
                info TEXT NOT NULL,
                recommendations TEXT,
                dividends TEXT,
                splits TEXT,
                balance_sheet TEXT
            )",
            [],
        )
        .map_err(unavailable)?;

        // Databases created by earlier schema variants lack the sub-document
        // columns; add them without touching existing rows.
        let existing = column_names(&conn)?;
        for column in OPTIONAL_COLUMNS {
            if !existing.contains(column) {
                debug!(column, "upgrading schema");
                conn.execute(&format!("ALTER TABLE stocks ADD COLUMN {column} TEXT"), [])
                    .map_err(unavailable)?;
            }
        }

        Ok(Self {
            conn,
            path,
            retry: BusyRetry::default(),
        })
    }

    /// Point lookup: is there a cached row for `symbol`?
    pub fn exists(&self, symbol: &str) -> Result<bool, StoreError> {
        with_busy_retry(&self.retry, || {
            match self.conn.query_row(
                "SELECT 1 FROM stocks WHERE symbol = ?1",
                params![symbol],
                |_| Ok(()),
            ) {
                Ok(()) => Ok(true),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
                Err(err) => Err(err),
            }
        })
    }

    /// Insert or fully replace the row for `symbol`.
    ///
    /// A single statement, so concurrent readers see either the old bundle or
    /// the new one, never a mix.
    pub fn upsert(&self, symbol: &str, payload: &StockPayload) -> Result<(), StoreError> {
        let info = encode(symbol, &payload.info)?;
        let recommendations = encode_opt(symbol, &payload.recommendations)?;
        let dividends = encode_opt(symbol, &payload.dividends)?;
        let splits = encode_opt(symbol, &payload.splits)?;
        let balance_sheet = encode_opt(symbol, &payload.balance_sheet)?;

        with_busy_retry(&self.retry, || {
            self.conn
                .execute(
                    UPSERT_SQL,
                    params![symbol, info, recommendations, dividends, splits, balance_sheet],
                )
                .map(|_| ())
        })?;

        debug!(symbol, "payload upserted");
        Ok(())
    }

    /// Fetch the cached bundle for `symbol`.
    pub fn get(&self, symbol: &str) -> Result<StockPayload, StoreError> {
        let row = self.conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM stocks WHERE symbol = ?1"),
            params![symbol],
            row_to_columns,
        );

        match row {
            Ok(columns) => decode_payload(symbol, columns),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                symbol: symbol.to_string(),
            }),
            Err(err) => Err(unavailable(err)),
        }
    }

    /// All cached bundles, ordered by symbol.
    pub fn list_all(&self) -> Result<Vec<(String, StockPayload)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT symbol, {SELECT_COLUMNS} FROM stocks ORDER BY symbol"
            ))
            .map_err(unavailable)?;

        let rows = stmt
            .query_map([], |row| {
                let symbol: String = row.get(0)?;
                let columns = (
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                );
                Ok((symbol, columns))
            })
            .map_err(unavailable)?;

        let mut entries = Vec::new();
        for row in rows {
            let (symbol, columns) = row.map_err(unavailable)?;
            let payload = decode_payload(&symbol, columns)?;
            entries.push((symbol, payload));
        }
        Ok(entries)
    }

    /// Byte-level snapshot of the whole store, for export/download surfaces.
    ///
    /// `VACUUM INTO` writes a consistent single-file copy even while other
    /// connections hold the main database, then the scratch file is read back
    /// and removed.
    pub fn snapshot(&self) -> Result<Vec<u8>, StoreError> {
        static SNAPSHOT_SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SNAPSHOT_SEQ.fetch_add(1, Ordering::Relaxed);
        let scratch = std::env::temp_dir().join(format!(
            "quotevault-snapshot-{}-{seq}.db",
            std::process::id()
        ));
        let scratch_str = scratch
            .to_str()
            .ok_or_else(|| StoreError::Unavailable("snapshot path is not valid UTF-8".into()))?;

        self.conn
            .execute("VACUUM INTO ?1", params![scratch_str])
            .map_err(unavailable)?;

        let bytes = std::fs::read(&scratch)
            .map_err(|e| StoreError::Unavailable(format!("read snapshot: {e}")));
        let _ = std::fs::remove_file(&scratch);
        bytes
    }

    /// Filesystem location of the store, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

type RawColumns = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn row_to_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_payload(symbol: &str, columns: RawColumns) -> Result<StockPayload, StoreError> {
    let (info, recommendations, dividends, splits, balance_sheet) = columns;
    Ok(StockPayload {
        info: decode(symbol, &info)?,
        recommendations: decode_opt(symbol, recommendations)?,
        dividends: decode_opt(symbol, dividends)?,
        splits: decode_opt(symbol, splits)?,
        balance_sheet: decode_opt(symbol, balance_sheet)?,
    })
}

fn encode(symbol: &str, value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        symbol: symbol.to_string(),
        reason: format!("encode: {e}"),
    })
}

fn encode_opt(symbol: &str, value: &Option<Value>) -> Result<Option<String>, StoreError> {
    value.as_ref().map(|v| encode(symbol, v)).transpose()
}

fn decode(symbol: &str, text: &str) -> Result<Value, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Corrupt {
        symbol: symbol.to_string(),
        reason: format!("decode: {e}"),
    })
}

fn decode_opt(symbol: &str, text: Option<String>) -> Result<Option<Value>, StoreError> {
    text.as_deref().map(|t| decode(symbol, t)).transpose()
}

fn column_names(conn: &Connection) -> Result<HashSet<String>, StoreError> {
    let mut stmt = conn
        .prepare("PRAGMA table_info(stocks)")
        .map_err(unavailable)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(unavailable)?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(unavailable)?;
    Ok(names)
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Run `op`, retrying on transient lock contention per the policy.
///
/// Standalone so attempt counting is testable without racing real
/// connections.
pub(crate) fn with_busy_retry<T>(
    retry: &BusyRetry,
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T, StoreError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_busy(&err) && attempt < retry.max_attempts => {
                warn!(attempt, max_attempts = retry.max_attempts, "store locked; retrying");
                std::thread::sleep(retry.delay);
                attempt += 1;
            }
            Err(err) if is_busy(&err) => {
                return Err(StoreError::Unavailable(format!(
                    "still locked after {} attempts: {err}",
                    retry.max_attempts
                )));
            }
            Err(err) => return Err(unavailable(err)),
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}
