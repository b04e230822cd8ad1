//! Ticker feed — the externally hosted list of symbols to refresh.
//!
//! The feed is a semicolon-delimited file with a header row and at least two
//! columns: ticker code, then display name. The whole batch depends on it, so
//! an unreachable feed, a malformed row, or an empty list is fatal; there is
//! no such thing as a partial ticker list.

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;

/// One entry from the ticker feed. Read-only input to the pipeline; never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerRecord {
    pub symbol: String,
    pub display_name: String,
}

/// Structured error types for the ticker feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("ticker feed unreachable: {0}")]
    Http(String),

    #[error("malformed ticker feed: {0}")]
    Malformed(String),

    #[error("ticker feed contains no rows")]
    Empty,
}

/// Download and parse the ticker feed.
pub fn fetch_tickers(client: &Client, url: &str) -> Result<Vec<TickerRecord>, FeedError> {
    debug!(url, "downloading ticker feed");
    let response = client
        .get(url)
        .send()
        .map_err(|e| FeedError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::Http(format!("HTTP {status}")));
    }

    let body = response.text().map_err(|e| FeedError::Http(e.to_string()))?;
    parse_tickers(body.as_bytes())
}

/// Parse the delimited feed body. Split out from [`fetch_tickers`] so parsing
/// is testable without a network.
pub fn parse_tickers(input: impl std::io::Read) -> Result<Vec<TickerRecord>, FeedError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let mut tickers = Vec::new();
    for (index, record) in reader.records().enumerate() {
        // Feed rows are 1-based and the header occupies the first line.
        let line = index + 2;
        let record = record.map_err(|e| FeedError::Malformed(format!("line {line}: {e}")))?;

        let symbol = record
            .get(0)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FeedError::Malformed(format!("line {line}: missing ticker code")))?;
        let display_name = record
            .get(1)
            .map(str::trim)
            .ok_or_else(|| FeedError::Malformed(format!("line {line}: missing display name")))?;

        tickers.push(TickerRecord {
            symbol: symbol.to_string(),
            display_name: display_name.to_string(),
        });
    }

    if tickers.is_empty() {
        return Err(FeedError::Empty);
    }

    debug!(count = tickers.len(), "ticker feed parsed");
    Ok(tickers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_column_feed() {
        let feed = "sigla_acao;nome\nPETR4;Petrobras\nVALE3;Vale\n";
        let tickers = parse_tickers(feed.as_bytes()).unwrap();

        assert_eq!(
            tickers,
            vec![
                TickerRecord {
                    symbol: "PETR4".into(),
                    display_name: "Petrobras".into()
                },
                TickerRecord {
                    symbol: "VALE3".into(),
                    display_name: "Vale".into()
                },
            ]
        );
    }

    #[test]
    fn extra_columns_are_ignored() {
        let feed = "sigla_acao;nome;setor\nPETR4;Petrobras;Energia\n";
        let tickers = parse_tickers(feed.as_bytes()).unwrap();
        assert_eq!(tickers[0].display_name, "Petrobras");
    }

    #[test]
    fn missing_name_column_is_fatal() {
        let feed = "sigla_acao;nome\nPETR4;Petrobras\nVALE3\n";
        let err = parse_tickers(feed.as_bytes()).unwrap_err();
        match err {
            FeedError::Malformed(msg) => assert!(msg.contains("line 3"), "msg: {msg}"),
            other => panic!("expected Malformed, got: {other:?}"),
        }
    }

    #[test]
    fn blank_symbol_is_fatal() {
        let feed = "sigla_acao;nome\n  ;Petrobras\n";
        assert!(matches!(
            parse_tickers(feed.as_bytes()),
            Err(FeedError::Malformed(_))
        ));
    }

    #[test]
    fn header_only_feed_is_empty() {
        let feed = "sigla_acao;nome\n";
        assert!(matches!(parse_tickers(feed.as_bytes()), Err(FeedError::Empty)));
    }

    #[test]
    fn unreachable_feed_is_http_error() {
        let mut server = mockito::Server::new();
        let _feed = server.mock("GET", "/acoes.csv").with_status(404).create();

        let client = Client::new();
        let err = fetch_tickers(&client, &format!("{}/acoes.csv", server.url())).unwrap_err();
        assert!(matches!(err, FeedError::Http(_)));
    }

    #[test]
    fn remote_feed_round_trips() {
        let mut server = mockito::Server::new();
        let _feed = server
            .mock("GET", "/acoes.csv")
            .with_body("sigla_acao;nome\nPETR4;Petrobras\n")
            .create();

        let client = Client::new();
        let tickers = fetch_tickers(&client, &format!("{}/acoes.csv", server.url())).unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].symbol, "PETR4");
    }
}
