//! QuoteVault core — session-authenticated fetch-and-cache pipeline for
//! per-symbol stock metadata.
//!
//! This crate contains the whole pipeline:
//! - Ticker feed loading (remote delimited list of symbols)
//! - Session negotiation (cookie + crumb anti-forgery token)
//! - Quote fetching with bounded retry/backoff and optional enrichment
//! - SQLite cache store with idempotent per-symbol upserts and busy-retry
//! - Batch refresh orchestration with per-symbol failure isolation
//!
//! The UI layer is deliberately absent: callers drive the pipeline through
//! [`refresh_all`], read through [`QuoteStore`], and render however they like.

pub mod config;
pub mod feed;
pub mod provider;
pub mod refresh;
pub mod session;
pub mod store;
pub mod yahoo;

pub use config::VaultConfig;
pub use feed::{fetch_tickers, parse_tickers, FeedError, TickerRecord};
pub use provider::{
    Backoff, EnrichmentPolicy, FetchConfig, FetchError, QuoteProvider, StockPayload,
};
pub use refresh::{
    refresh_all, RefreshError, RefreshMode, RefreshOptions, RefreshProgress, RefreshReport,
    StdoutProgress, SymbolFailure, SymbolOutcome,
};
pub use session::{SessionContext, USER_AGENT};
pub use store::{BusyRetry, QuoteStore, StoreError};
pub use yahoo::{Endpoints, YahooProvider};
