//! Quote provider trait and structured error types.
//!
//! The QuoteProvider trait abstracts over the upstream data source so the
//! refresh orchestrator can be exercised against mocks. The concrete HTTP
//! implementation lives in [`crate::yahoo`].

use crate::session::SessionContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Upstream field catalog requested with the primary quote call. Treated as
/// opaque configuration and passed through to the provider unchanged.
pub const DEFAULT_QUOTE_FIELDS: &str = "summaryProfile,summaryDetail,esgScores,price,\
incomeStatementHistory,incomeStatementHistoryQuarterly,balanceSheetHistory,\
balanceSheetHistoryQuarterly,cashflowStatementHistory,cashflowStatementHistoryQuarterly,\
defaultKeyStatistics,financialData,calendarEvents,secFilings,recommendationTrend,\
upgradeDowngradeHistory,institutionOwnership,fundOwnership,majorDirectHolders,\
majorHoldersBreakdown,insiderTransactions,insiderHolders,netSharePurchaseActivity,\
earnings,earningsHistory,earningsTrend,industryTrend,indexTrend,sectorTrend";

/// Modules requested from the secondary quote-summary lookup.
pub const DEFAULT_SUMMARY_MODULES: &str = "recommendationTrend,balanceSheetHistory";

/// Per-symbol payload bundle as persisted in the cache store.
///
/// `info` is the primary quote/profile document; the rest are optional
/// enrichment sub-documents that later schema variants added. All are opaque
/// structured text: the pipeline stores and retrieves, it does not interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPayload {
    pub info: Value,
    #[serde(default)]
    pub recommendations: Option<Value>,
    #[serde(default)]
    pub dividends: Option<Value>,
    #[serde(default)]
    pub splits: Option<Value>,
    #[serde(default)]
    pub balance_sheet: Option<Value>,
}

impl StockPayload {
    /// Payload carrying only the primary document.
    pub fn bare(info: Value) -> Self {
        Self {
            info,
            recommendations: None,
            dividends: None,
            splits: None,
            balance_sheet: None,
        }
    }
}

/// Structured error types for fetch-side operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Session negotiation failed, or the provider rejected the session on a
    /// data call. Never retried by the fetch loop; session renewal is the
    /// orchestrator's job.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP 429 from the provider.
    #[error("rate limited by provider")]
    RateLimited,

    /// Any other transient condition: non-200 status, a response missing the
    /// expected result wrapper ("not yet available"), or an enrichment
    /// failure under [`EnrichmentPolicy::Required`].
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Transport-level failure (connect, timeout, mid-body).
    #[error("network error: {0}")]
    Network(String),

    /// Terminal per-symbol failure after the retry budget is spent.
    #[error("fetch for '{symbol}' failed after {attempts} attempts: {reason}")]
    Exhausted {
        symbol: String,
        attempts: u32,
        reason: String,
    },
}

impl FetchError {
    /// Whether the fetch loop should spend another attempt on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited | FetchError::Transient(_) | FetchError::Network(_)
        )
    }

    /// Auth-shaped errors trigger session renewal instead of backoff.
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }
}

/// Backoff schedule between fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Fixed delay between attempts.
    Constant { secs: u64 },
    /// Delay doubles after every attempt, starting at `base_secs`.
    Exponential { base_secs: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential { base_secs: 1 }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1 is the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Constant { secs } => Duration::from_secs(secs),
            Backoff::Exponential { base_secs } => {
                let factor = 1u64 << retry.saturating_sub(1).min(16);
                Duration::from_secs(base_secs.saturating_mul(factor))
            }
        }
    }
}

/// What to do when the primary payload was obtained but an enrichment
/// sub-document fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentPolicy {
    /// Enrichment failures count as fetch failures for the whole symbol.
    #[default]
    Required,
    /// Store the primary payload; failed sub-documents stay absent.
    BestEffort,
}

/// Fetch-side tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Attempts per symbol before the fetch is declared exhausted.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub enrichment: EnrichmentPolicy,
    /// Field catalog for the primary quote call, passed through verbatim.
    pub fields: String,
    /// Module list for the quote-summary enrichment call, passed through
    /// verbatim.
    pub modules: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
            enrichment: EnrichmentPolicy::default(),
            fields: DEFAULT_QUOTE_FIELDS.to_string(),
            modules: DEFAULT_SUMMARY_MODULES.to_string(),
        }
    }
}

/// Trait for quote providers.
///
/// `fetch` owns the retry/backoff loop; auth-shaped errors pass straight
/// through so the caller can renegotiate the session and try again.
pub trait QuoteProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Negotiate fresh session material. Called once per batch, and again
    /// whenever a fetch reports an auth-shaped failure.
    fn acquire_session(&self) -> Result<SessionContext, FetchError>;

    /// Fetch the payload bundle for one symbol using the given session.
    fn fetch(&self, symbol: &str, session: &SessionContext) -> Result<StockPayload, FetchError>;

    /// Cheap reachability probe: can the provider issue a session right now?
    fn test_connectivity(&self) -> Result<(), FetchError> {
        self.acquire_session().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_is_flat() {
        let b = Backoff::Constant { secs: 2 };
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(4), Duration::from_secs(2));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let b = Backoff::Exponential { base_secs: 1 };
        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(2), Duration::from_secs(2));
        assert_eq!(b.delay(3), Duration::from_secs(4));
        assert_eq!(b.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn exponential_backoff_saturates() {
        let b = Backoff::Exponential { base_secs: u64::MAX / 2 };
        // Must not overflow for absurd retry counts.
        let _ = b.delay(200);
    }

    #[test]
    fn default_config_matches_contract() {
        let cfg = FetchConfig::default();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.backoff, Backoff::Exponential { base_secs: 1 });
        assert_eq!(cfg.enrichment, EnrichmentPolicy::Required);
    }

    #[test]
    fn retryable_classification() {
        assert!(FetchError::RateLimited.is_retryable());
        assert!(FetchError::Transient("x".into()).is_retryable());
        assert!(FetchError::Network("x".into()).is_retryable());
        assert!(!FetchError::Auth("x".into()).is_retryable());
        assert!(FetchError::Auth("x".into()).is_auth());
        let exhausted = FetchError::Exhausted {
            symbol: "SYM".into(),
            attempts: 5,
            reason: "rate limited".into(),
        };
        assert!(!exhausted.is_retryable());
    }
}
