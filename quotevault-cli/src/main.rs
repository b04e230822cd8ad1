//! QuoteVault CLI — refresh, lookup, and export commands.
//!
//! Commands:
//! - `tickers` — list the symbols served by the remote feed
//! - `refresh` — fetch every ticker and upsert into the local store
//! - `show` — print the cached payload for one symbol
//! - `list` — list every cached symbol and its sub-documents
//! - `export` — write a byte-level snapshot of the store to a file
//! - `ping` — check that the provider will issue a session

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quotevault_core::{
    fetch_tickers, refresh_all, QuoteProvider, QuoteStore, RefreshMode, RefreshOptions,
    StdoutProgress, TickerRecord, VaultConfig, YahooProvider, USER_AGENT,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "quotevault",
    about = "QuoteVault CLI — fetch and cache stock metadata from the upstream provider"
)]
struct Cli {
    /// Path to a TOML config file. Command-line flags override file values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the symbols served by the remote ticker feed.
    Tickers {
        /// Feed URL. Defaults to the configured feed.
        #[arg(long)]
        feed_url: Option<String>,
    },
    /// Fetch every ticker from the feed and upsert into the local store.
    Refresh {
        /// Feed URL. Defaults to the configured feed.
        #[arg(long)]
        feed_url: Option<String>,

        /// Store location. Defaults to the configured path.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Skip symbols that already have a cached row.
        #[arg(long, default_value_t = false)]
        skip_cached: bool,

        /// Refresh only these symbols instead of the whole feed.
        #[arg(long)]
        symbols: Vec<String>,
    },
    /// Print the cached payload for one symbol.
    Show {
        symbol: String,

        /// Store location. Defaults to the configured path.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List every cached symbol.
    List {
        /// Store location. Defaults to the configured path.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Write a byte-level snapshot of the store to a file.
    Export {
        /// Output file for the snapshot.
        #[arg(long)]
        out: PathBuf,

        /// Store location. Defaults to the configured path.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Check that the provider will issue a session.
    Ping,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => VaultConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => VaultConfig::default(),
    };

    match cli.command {
        Commands::Tickers { feed_url } => run_tickers(&config, feed_url),
        Commands::Refresh {
            feed_url,
            db,
            skip_cached,
            symbols,
        } => run_refresh(&config, feed_url, db, skip_cached, symbols),
        Commands::Show { symbol, db } => run_show(&config, &symbol, db),
        Commands::List { db } => run_list(&config, db),
        Commands::Export { out, db } => run_export(&config, &out, db),
        Commands::Ping => run_ping(&config),
    }
}

fn feed_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .context("building HTTP client")
}

fn open_store(config: &VaultConfig, db: Option<PathBuf>) -> Result<QuoteStore> {
    let path = db.unwrap_or_else(|| config.db_path.clone());
    QuoteStore::open(&path).with_context(|| format!("opening store at {}", path.display()))
}

fn run_tickers(config: &VaultConfig, feed_url: Option<String>) -> Result<()> {
    let url = feed_url.unwrap_or_else(|| config.feed_url.clone());
    let tickers = fetch_tickers(&feed_client()?, &url)?;

    for ticker in &tickers {
        println!("{:<8} {}", ticker.symbol, ticker.display_name);
    }
    println!("\n{} tickers", tickers.len());
    Ok(())
}

fn run_refresh(
    config: &VaultConfig,
    feed_url: Option<String>,
    db: Option<PathBuf>,
    skip_cached: bool,
    symbols: Vec<String>,
) -> Result<()> {
    let tickers = if symbols.is_empty() {
        let url = feed_url.unwrap_or_else(|| config.feed_url.clone());
        fetch_tickers(&feed_client()?, &url)?
    } else {
        symbols
            .into_iter()
            .map(|symbol| TickerRecord {
                display_name: symbol.clone(),
                symbol,
            })
            .collect()
    };

    let store = open_store(config, db)?;
    let provider = YahooProvider::new(config.fetch.clone());
    let mode = if skip_cached {
        RefreshMode::SkipCached
    } else {
        config.mode
    };
    let options = RefreshOptions {
        mode,
        ..RefreshOptions::default()
    };

    let report = refresh_all(&provider, &store, &tickers, &options, &StdoutProgress)?;

    if !report.all_succeeded() {
        for (symbol, failure) in &report.failed {
            eprintln!("Warning: {symbol}: {failure}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_show(config: &VaultConfig, symbol: &str, db: Option<PathBuf>) -> Result<()> {
    let store = open_store(config, db)?;
    let payload = store.get(symbol)?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_list(config: &VaultConfig, db: Option<PathBuf>) -> Result<()> {
    let store = open_store(config, db)?;
    let entries = store.list_all()?;

    if entries.is_empty() {
        println!("Store is empty.");
        return Ok(());
    }

    for (symbol, payload) in &entries {
        let mut extras = Vec::new();
        if payload.recommendations.is_some() {
            extras.push("recommendations");
        }
        if payload.dividends.is_some() {
            extras.push("dividends");
        }
        if payload.splits.is_some() {
            extras.push("splits");
        }
        if payload.balance_sheet.is_some() {
            extras.push("balance_sheet");
        }
        if extras.is_empty() {
            println!("{symbol}");
        } else {
            println!("{symbol} [{}]", extras.join(", "));
        }
    }
    println!("\n{} cached symbols", entries.len());
    Ok(())
}

fn run_export(config: &VaultConfig, out: &Path, db: Option<PathBuf>) -> Result<()> {
    let store = open_store(config, db)?;
    let bytes = store.snapshot()?;
    std::fs::write(out, &bytes).with_context(|| format!("writing snapshot to {}", out.display()))?;
    println!("Snapshot written to {} ({} bytes)", out.display(), bytes.len());
    Ok(())
}

fn run_ping(config: &VaultConfig) -> Result<()> {
    let provider = YahooProvider::new(config.fetch.clone());
    match provider.test_connectivity() {
        Ok(()) => {
            println!("Provider reachable; session issued.");
            Ok(())
        }
        Err(err) => bail!("provider unreachable: {err}"),
    }
}
