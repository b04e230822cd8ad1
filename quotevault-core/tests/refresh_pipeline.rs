//! Integration tests for the full pipeline: mock provider endpoints, real
//! HTTP client, real file-backed store.

use mockito::Matcher;
use quotevault_core::{
    fetch_tickers, refresh_all, Backoff, Endpoints, FetchConfig, FetchError, QuoteProvider,
    QuoteStore, RefreshOptions, RefreshProgress, RefreshReport, SymbolFailure, SymbolOutcome,
    YahooProvider, USER_AGENT,
};
use serde_json::json;

struct NullProgress;

impl RefreshProgress for NullProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<SymbolOutcome, SymbolFailure>) {}
    fn on_batch_complete(&self, _: &RefreshReport) {}
}

fn endpoints(server: &mockito::Server) -> Endpoints {
    let base = server.url();
    Endpoints {
        cookie_url: base.clone(),
        crumb_url: format!("{base}/v1/test/getcrumb"),
        quote_url: format!("{base}/v7/finance/quote"),
        summary_url: format!("{base}/v10/finance/quoteSummary"),
        chart_url: format!("{base}/v8/finance/chart"),
    }
}

fn fast_config() -> FetchConfig {
    FetchConfig {
        backoff: Backoff::Constant { secs: 0 },
        ..FetchConfig::default()
    }
}

/// Session endpoints that always succeed.
fn mock_session(server: &mut mockito::Server) -> (mockito::Mock, mockito::Mock) {
    let cookie = server
        .mock("GET", "/")
        .with_status(404)
        .with_header("set-cookie", "A3=session; Path=/")
        .create();
    let crumb = server
        .mock("GET", "/v1/test/getcrumb")
        .with_status(200)
        .with_body("crumbtok")
        .create();
    (cookie, crumb)
}

fn mock_enrichment(server: &mut mockito::Server, symbol: &str) -> (mockito::Mock, mockito::Mock) {
    let summary = server
        .mock("GET", format!("/v10/finance/quoteSummary/{symbol}").as_str())
        .match_query(Matcher::Any)
        .with_body(
            json!({"quoteSummary": {"result": [
                {"recommendationTrend": {"trend": []}, "balanceSheetHistory": {"balanceSheetStatements": []}}
            ]}})
            .to_string(),
        )
        .create();
    let chart = server
        .mock("GET", format!("/v8/finance/chart/{symbol}").as_str())
        .match_query(Matcher::Any)
        .with_body(
            json!({"chart": {"result": [{"events": {"dividends": {"1700000000": {"amount": 0.42}}}}]}})
                .to_string(),
        )
        .create();
    (summary, chart)
}

#[test]
fn feed_to_store_with_one_rate_limited_symbol() {
    let mut server = mockito::Server::new();
    let _session = mock_session(&mut server);

    // Ticker feed with two symbols.
    let _feed = server
        .mock("GET", "/acoes.csv")
        .with_body("sigla_acao;nome\nPETR4;Petrobras\nVALE3;Vale\n")
        .create();

    // PETR4 succeeds on the first attempt.
    let petr_quote = server
        .mock("GET", "/v7/finance/quote")
        .match_query(Matcher::UrlEncoded("symbols".into(), "PETR4".into()))
        .with_body(
            json!({"quoteResponse": {"result": [{"symbol": "PETR4", "longName": "Petrobras"}], "error": null}})
                .to_string(),
        )
        .expect(1)
        .create();
    let _enrichment = mock_enrichment(&mut server, "PETR4");

    // VALE3 is rate limited on every attempt.
    let vale_quote = server
        .mock("GET", "/v7/finance/quote")
        .match_query(Matcher::UrlEncoded("symbols".into(), "VALE3".into()))
        .with_status(429)
        .expect(5)
        .create();

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap();
    let tickers = fetch_tickers(&client, &format!("{}/acoes.csv", server.url())).unwrap();
    assert_eq!(tickers.len(), 2);
    assert_eq!(tickers[0].display_name, "Petrobras");

    let dir = tempfile::tempdir().unwrap();
    let store = QuoteStore::open(dir.path().join("quotes.db")).unwrap();
    let provider = YahooProvider::with_endpoints(endpoints(&server), fast_config());

    let report = refresh_all(
        &provider,
        &store,
        &tickers,
        &RefreshOptions::default(),
        &NullProgress,
    )
    .unwrap();

    assert_eq!(report.updated, vec!["PETR4"]);
    assert!(report.skipped.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "VALE3");
    match &report.failed[0].1 {
        SymbolFailure::Fetch(FetchError::Exhausted { attempts, .. }) => assert_eq!(*attempts, 5),
        other => panic!("expected exhausted fetch, got: {other:?}"),
    }

    // Exactly the configured attempt budget was spent on VALE3, and the
    // successful symbol cost a single call.
    vale_quote.assert();
    petr_quote.assert();

    // The store holds the successful symbol only.
    assert!(store.exists("PETR4").unwrap());
    assert!(!store.exists("VALE3").unwrap());
    let cached = store.get("PETR4").unwrap();
    assert_eq!(cached.info["longName"], "Petrobras");
    assert!(cached.dividends.is_some());
}

#[test]
fn rejected_session_is_renegotiated_then_fails_only_that_symbol() {
    let mut server = mockito::Server::new();
    // Initial negotiation plus the transparent renewal.
    let cookie = server
        .mock("GET", "/")
        .with_status(404)
        .with_header("set-cookie", "A3=session; Path=/")
        .expect(2)
        .create();
    let crumb = server
        .mock("GET", "/v1/test/getcrumb")
        .with_status(200)
        .with_body("crumbtok")
        .expect(2)
        .create();

    // The provider rejects the session on every data call.
    let quote = server
        .mock("GET", "/v7/finance/quote")
        .match_query(Matcher::Any)
        .with_status(401)
        .expect(2)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let store = QuoteStore::open(dir.path().join("quotes.db")).unwrap();
    let provider = YahooProvider::with_endpoints(endpoints(&server), fast_config());

    let tickers = vec![quotevault_core::TickerRecord {
        symbol: "PETR4".into(),
        display_name: "Petrobras".into(),
    }];
    let report = refresh_all(
        &provider,
        &store,
        &tickers,
        &RefreshOptions::default(),
        &NullProgress,
    )
    .unwrap();

    // Batch survives; the symbol fails as auth-shaped after one renewal.
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        report.failed[0].1,
        SymbolFailure::Fetch(FetchError::Auth(_))
    ));
    cookie.assert();
    crumb.assert();
    quote.assert();
}

#[test]
fn connectivity_probe_uses_session_endpoints() {
    let mut server = mockito::Server::new();
    let _session = mock_session(&mut server);

    let provider = YahooProvider::with_endpoints(endpoints(&server), fast_config());
    assert!(provider.test_connectivity().is_ok());
}

#[test]
fn connectivity_probe_fails_without_cookie() {
    let mut server = mockito::Server::new();
    let _cookie = server.mock("GET", "/").with_status(200).create();

    let provider = YahooProvider::with_endpoints(endpoints(&server), fast_config());
    assert!(provider.test_connectivity().is_err());
}
