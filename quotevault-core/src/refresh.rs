//! Refresh orchestrator — coordinates one batch over the ticker list.
//!
//! One session is negotiated per batch and reused across every fetch; a fetch
//! that comes back auth-shaped triggers a single transparent renegotiation
//! for that symbol. Per-symbol failures are recorded and the batch moves on;
//! only a failed initial negotiation aborts the run.

use crate::feed::TickerRecord;
use crate::provider::{FetchError, QuoteProvider};
use crate::session::SessionContext;
use crate::store::{QuoteStore, StoreError};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Whether a cached row short-circuits the fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Fetch and overwrite every symbol. The safe default: cached rows have
    /// no freshness marker, so overwriting is the only way to stay current.
    #[default]
    Always,
    /// Skip symbols that already have a row, for cheap incremental runs.
    SkipCached,
}

/// Batch-level options.
#[derive(Clone, Default)]
pub struct RefreshOptions {
    pub mode: RefreshMode,
    /// Checked between ticker iterations; set to stop the batch without
    /// losing rows already written.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RefreshOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Why one symbol failed. Never escapes the batch; aggregated into the
/// report.
#[derive(Debug, Error)]
pub enum SymbolFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The only batch-fatal orchestration error: no session, no fetches.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("session negotiation failed: {0}")]
    Auth(#[source] FetchError),
}

/// What happened to one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOutcome {
    Updated,
    Skipped,
}

/// Summary of a batch refresh.
#[derive(Debug)]
pub struct RefreshReport {
    pub total: usize,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, SymbolFailure)>,
    /// True when the batch stopped at the cancellation flag; symbols after
    /// the stop point appear in no bucket.
    pub cancelled: bool,
}

impl RefreshReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

/// Progress callback for batch refreshes, so callers can surface per-symbol
/// warnings without the core knowing about any UI.
pub trait RefreshProgress: Send {
    /// Called when a symbol's refresh starts.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol's refresh completes.
    fn on_complete(
        &self,
        symbol: &str,
        index: usize,
        total: usize,
        result: &Result<SymbolOutcome, SymbolFailure>,
    );

    /// Called once the whole batch is done.
    fn on_batch_complete(&self, report: &RefreshReport);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl RefreshProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Refreshing {symbol}...", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<SymbolOutcome, SymbolFailure>,
    ) {
        match result {
            Ok(SymbolOutcome::Updated) => println!("  OK: {symbol}"),
            Ok(SymbolOutcome::Skipped) => println!("  SKIP: {symbol} (already cached)"),
            Err(failure) => println!("  FAIL: {symbol}: {failure}"),
        }
    }

    fn on_batch_complete(&self, report: &RefreshReport) {
        println!(
            "\nRefresh complete: {} updated, {} skipped, {} failed ({} total){}",
            report.updated.len(),
            report.skipped.len(),
            report.failed.len(),
            report.total,
            if report.cancelled { " (cancelled)" } else { "" },
        );
    }
}

/// Refresh every ticker in the list against the store.
pub fn refresh_all(
    provider: &dyn QuoteProvider,
    store: &QuoteStore,
    tickers: &[TickerRecord],
    options: &RefreshOptions,
    progress: &dyn RefreshProgress,
) -> Result<RefreshReport, RefreshError> {
    let total = tickers.len();
    let mut session = provider.acquire_session().map_err(RefreshError::Auth)?;
    info!(total, provider = provider.name(), "starting refresh batch");

    let mut updated = Vec::new();
    let mut skipped = Vec::new();
    let mut failed: Vec<(String, SymbolFailure)> = Vec::new();
    let mut cancelled = false;

    for (index, ticker) in tickers.iter().enumerate() {
        if options.is_cancelled() {
            warn!(processed = index, total, "refresh cancelled");
            cancelled = true;
            break;
        }

        let symbol = ticker.symbol.as_str();
        progress.on_start(symbol, index, total);

        let result = refresh_symbol(provider, &mut session, store, symbol, options.mode);
        progress.on_complete(symbol, index, total, &result);

        match result {
            Ok(SymbolOutcome::Updated) => updated.push(symbol.to_string()),
            Ok(SymbolOutcome::Skipped) => skipped.push(symbol.to_string()),
            Err(failure) => {
                warn!(symbol, error = %failure, "symbol refresh failed");
                failed.push((symbol.to_string(), failure));
            }
        }
    }

    let report = RefreshReport {
        total,
        updated,
        skipped,
        failed,
        cancelled,
    };
    progress.on_batch_complete(&report);
    info!(
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "refresh batch finished"
    );
    Ok(report)
}

fn refresh_symbol(
    provider: &dyn QuoteProvider,
    session: &mut SessionContext,
    store: &QuoteStore,
    symbol: &str,
    mode: RefreshMode,
) -> Result<SymbolOutcome, SymbolFailure> {
    if mode == RefreshMode::SkipCached && store.exists(symbol)? {
        debug!(symbol, "already cached; skipping");
        return Ok(SymbolOutcome::Skipped);
    }

    let payload = fetch_with_renewal(provider, session, symbol)?;
    store.upsert(symbol, &payload)?;
    Ok(SymbolOutcome::Updated)
}

/// Fetch once; if the provider rejects the session, renegotiate and try that
/// symbol again.
fn fetch_with_renewal(
    provider: &dyn QuoteProvider,
    session: &mut SessionContext,
    symbol: &str,
) -> Result<crate::provider::StockPayload, FetchError> {
    match provider.fetch(symbol, session) {
        Err(err) if err.is_auth() => {
            info!(symbol, "session rejected; renegotiating");
            *session = provider.acquire_session()?;
            provider.fetch(symbol, session)
        }
        other => other,
    }
}
