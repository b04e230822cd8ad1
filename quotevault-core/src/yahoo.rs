//! Yahoo Finance quote provider.
//!
//! Fetches the per-symbol quote/profile document plus optional enrichment
//! sub-documents (recommendation trend, dividend and split history, balance
//! sheet) through the crumb-authenticated v7/v10/v8 endpoints. Handles rate
//! limiting and transient failures with a bounded retry loop.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes; every response is treated as suspect until the expected result
//! wrapper is found.

use crate::provider::{EnrichmentPolicy, FetchConfig, FetchError, QuoteProvider, StockPayload};
use crate::session::{self, SessionContext, USER_AGENT};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Endpoint set for one provider instance. Defaults point at the live
/// provider; tests substitute a local mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Issues the session cookie (any status, cookie header is what counts).
    pub cookie_url: String,
    /// Exchanges the cookie for a crumb token (plain-text body).
    pub crumb_url: String,
    /// Primary quote endpoint; takes `symbols`, `fields` and `crumb` params.
    pub quote_url: String,
    /// Quote-summary endpoint; symbol is a path segment, takes `modules`.
    pub summary_url: String,
    /// Chart endpoint; symbol is a path segment, dividend/split events.
    pub chart_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            cookie_url: "https://fc.yahoo.com".into(),
            crumb_url: "https://query2.finance.yahoo.com/v1/test/getcrumb".into(),
            quote_url: "https://query2.finance.yahoo.com/v7/finance/quote".into(),
            summary_url: "https://query2.finance.yahoo.com/v10/finance/quoteSummary".into(),
            chart_url: "https://query2.finance.yahoo.com/v8/finance/chart".into(),
        }
    }
}

/// Yahoo Finance provider.
pub struct YahooProvider {
    client: Client,
    endpoints: Endpoints,
    config: FetchConfig,
}

impl YahooProvider {
    pub fn new(config: FetchConfig) -> Self {
        Self::with_endpoints(Endpoints::default(), config)
    }

    pub fn with_endpoints(endpoints: Endpoints, config: FetchConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            endpoints,
            config,
        }
    }

    /// One complete attempt: primary quote plus enrichment.
    fn fetch_once(&self, symbol: &str, session: &SessionContext) -> Result<StockPayload, FetchError> {
        let info = self.fetch_quote(symbol, session)?;
        let mut payload = StockPayload::bare(info);

        match self.fetch_enrichment(symbol, session) {
            Ok(enrichment) => {
                payload.recommendations = enrichment.recommendations;
                payload.dividends = enrichment.dividends;
                payload.splits = enrichment.splits;
                payload.balance_sheet = enrichment.balance_sheet;
            }
            Err(err) => match self.config.enrichment {
                EnrichmentPolicy::Required => return Err(err),
                EnrichmentPolicy::BestEffort => {
                    warn!(symbol, error = %err, "enrichment failed; keeping primary payload");
                }
            },
        }

        Ok(payload)
    }

    /// Primary quote document: first element of the `quoteResponse.result`
    /// array.
    fn fetch_quote(&self, symbol: &str, session: &SessionContext) -> Result<Value, FetchError> {
        let url = format!(
            "{}?symbols={symbol}&fields={fields}&crumb={crumb}",
            self.endpoints.quote_url,
            fields = self.config.fields,
            crumb = session.crumb,
        );
        let envelope: QuoteEnvelope = self.get_json(&url, session)?;

        envelope
            .quote_response
            .and_then(|r| r.result)
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
            .ok_or_else(|| FetchError::Transient(format!("no quote result for {symbol} yet")))
    }

    fn fetch_enrichment(&self, symbol: &str, session: &SessionContext) -> Result<Enrichment, FetchError> {
        let url = format!(
            "{}/{symbol}?modules={modules}&crumb={crumb}",
            self.endpoints.summary_url,
            modules = self.config.modules,
            crumb = session.crumb,
        );
        let envelope: SummaryEnvelope = self.get_json(&url, session)?;
        let summary = envelope
            .quote_summary
            .and_then(|r| r.result)
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
            .ok_or_else(|| FetchError::Transient(format!("no summary result for {symbol} yet")))?;

        let url = format!(
            "{}/{symbol}?range=10y&interval=1d&events=div%2Csplits",
            self.endpoints.chart_url,
        );
        let envelope: ChartEnvelope = self.get_json(&url, session)?;
        let chart = envelope
            .chart
            .and_then(|r| r.result)
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
            .ok_or_else(|| FetchError::Transient(format!("no chart result for {symbol} yet")))?;

        // A symbol with no dividend or split history simply lacks the series;
        // that is data, not failure.
        Ok(Enrichment {
            recommendations: summary.get("recommendationTrend").cloned(),
            balance_sheet: summary.get("balanceSheetHistory").cloned(),
            dividends: chart.pointer("/events/dividends").cloned(),
            splits: chart.pointer("/events/splits").cloned(),
        })
    }

    /// Authenticated GET, status classification, JSON decode.
    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        session: &SessionContext,
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::COOKIE, &session.cookie)
            .send()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        classify_status(response.status())?;

        response
            .json()
            .map_err(|e| FetchError::Transient(format!("malformed response: {e}")))
    }
}

/// Map an HTTP status onto the fetch error taxonomy.
fn classify_status(status: StatusCode) -> Result<(), FetchError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FetchError::Auth(format!("provider rejected session (HTTP {status})")));
    }
    if !status.is_success() {
        return Err(FetchError::Transient(format!("HTTP {status}")));
    }
    Ok(())
}

impl QuoteProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn acquire_session(&self) -> Result<SessionContext, FetchError> {
        session::negotiate(&self.client, &self.endpoints.cookie_url, &self.endpoints.crumb_url)
    }

    fn fetch(&self, symbol: &str, session: &SessionContext) -> Result<StockPayload, FetchError> {
        let mut last_error: Option<FetchError> = None;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                let delay = self.config.backoff.delay(attempt - 1);
                debug!(symbol, attempt, ?delay, "retrying fetch");
                std::thread::sleep(delay);
            }

            match self.fetch_once(symbol, session) {
                Ok(payload) => return Ok(payload),
                Err(err) if err.is_retryable() => {
                    warn!(symbol, attempt, error = %err, "fetch attempt failed");
                    last_error = Some(err);
                }
                // Auth-shaped: surface immediately so the caller can
                // renegotiate the session.
                Err(err) => return Err(err),
            }
        }

        Err(FetchError::Exhausted {
            symbol: symbol.to_string(),
            attempts: self.config.max_attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt recorded".into()),
        })
    }
}

struct Enrichment {
    recommendations: Option<Value>,
    dividends: Option<Value>,
    splits: Option<Value>,
    balance_sheet: Option<Value>,
}

// de
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: Option<QuoteResponse>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    result: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    #[serde(rename = "quoteSummary")]
    quote_summary: Option<SummaryResponse>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    result: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Option<ChartResponse>,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    result: Option<Vec<Value>>,
}
