//! Autotrail CLI
//!
//! Host process for the trailing stop engine: manages tracked positions,
//! the broker credential, and the polling loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use autotrail::api::{KiteClient, OrderExecutor, PaperBroker, KITE_API_URL};
use autotrail::models::{StopLossPosition, StopMode};
use autotrail::store::{ConfigStore, JsonFileStore, SqliteStore, TradeJournal};
use autotrail::trading::{EngineConfig, PositionRegistry, TrailingStopEngine};

/// Trailing stop-loss engine CLI.
#[derive(Parser)]
#[command(name = "autotrail")]
#[command(about = "Trail stop-losses on held positions and exit through the broker", long_about = None)]
struct Cli {
    /// Store location: a sqlite: URL or a JSON file path
    #[arg(short, long, env = "AUTOTRAIL_STORE", default_value = "sqlite:./autotrail.db?mode=rwc")]
    store: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start trailing a position
    Register {
        /// Instrument symbol, optionally prefixed with the exchange (NSE:INFY)
        symbol: String,

        /// Units held
        #[arg(short, long)]
        quantity: u64,

        /// Entry price; fetched from the broker when omitted
        #[arg(short, long)]
        entry: Option<Decimal>,

        /// Stop mode (percentage, fixed)
        #[arg(short, long, default_value = "percentage")]
        mode: StopMode,

        /// Percent below the high, or absolute offset for fixed mode
        #[arg(short, long)]
        param: Decimal,
    },

    /// Stop trailing a position
    Unregister {
        symbol: String,
    },

    /// List tracked positions
    List,

    /// Run the trailing stop loop until Ctrl+C
    Run {
        /// Polling interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Fill exits with the paper broker instead of placing real orders.
        /// Quotes still come from Kite, so KITE_API_KEY is required
        #[arg(long)]
        dry_run: bool,

        /// Give up on an exit after this many failed orders
        #[arg(long)]
        max_exit_attempts: Option<u32>,
    },

    /// Show recently closed positions
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Store the broker access token (omit to clear it)
    SetToken {
        token: Option<String>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let (store, journal) = open_store(&cli.store).await?;
    let config = EngineConfig::default();

    match cli.command {
        Commands::Register {
            symbol,
            quantity,
            entry,
            mode,
            param,
        } => {
            let mut registry = PositionRegistry::load(store).await;

            let position = match entry {
                Some(entry) => {
                    let position = StopLossPosition::new(symbol.as_str(), quantity, entry, mode, param)?;
                    registry.register(position.clone()).await;
                    if registry.is_dirty() {
                        anyhow::bail!("Position for {} could not be saved", symbol);
                    }
                    position
                }
                None => {
                    let kite = Arc::new(KiteClient::from_env(registry.credential_token())?);
                    let engine = TrailingStopEngine::with_registry(config, registry, kite.clone(), kite);
                    engine.register(&symbol, quantity, None, mode, param).await?
                }
            };

            println!("Now trailing: {}", position.symbol);
            println!("  Quantity:     {}", position.quantity);
            println!("  Entry:        {}", position.entry_price);
            println!("  Mode:         {} ({})", position.stop_mode, position.stop_parameter);
            println!("  Initial Stop: {}", position.stop_price);
        }

        Commands::Unregister { symbol } => {
            let mut registry = PositionRegistry::load(store).await;
            if registry.unregister(&symbol).await {
                if registry.is_dirty() {
                    anyhow::bail!("Removal of {} could not be saved", symbol);
                }
                println!("Stopped trailing: {}", symbol);
            } else {
                println!("Not tracked: {}", symbol);
            }
        }

        Commands::List => {
            let registry = PositionRegistry::load(store).await;
            let positions = registry.all();

            if positions.is_empty() {
                println!("No positions tracked. Use 'autotrail register <symbol>' to add one.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:>8} {:>12} {:>12} {:>12} {:>12} {:<16} {:<8}",
                "SYMBOL", "QTY", "ENTRY", "HIGH", "STOP", "LOCKED", "MODE", "STATUS"
            );
            println!("{}", "-".repeat(107));

            for (symbol, pos) in positions {
                let status = if pos.is_exit_pending() {
                    format!("EXIT x{}", pos.failed_exit_attempts)
                } else {
                    "trailing".to_string()
                };
                println!(
                    "{:<20} {:>8} {:>12} {:>12} {:>12} {:>12} {:<16} {:<8}",
                    truncate(&symbol, 20),
                    pos.quantity,
                    pos.entry_price,
                    pos.high_water_mark,
                    pos.stop_price,
                    pos.locked_in(),
                    format!("{} {}", pos.stop_mode, pos.stop_parameter),
                    status
                );
            }
        }

        Commands::Run {
            interval,
            dry_run,
            max_exit_attempts,
        } => {
            let config = EngineConfig {
                poll_interval_secs: interval.unwrap_or(config.poll_interval_secs),
                max_exit_attempts,
                ..config
            };

            let stored_token = store.load().await.ok().and_then(|s| s.credential_token);
            let kite = Arc::new(
                KiteClient::from_env(stored_token.as_deref())
                    .context("run needs Kite credentials for live quotes, also with --dry-run")?,
            );
            let executor: Arc<dyn OrderExecutor> = if dry_run {
                Arc::new(PaperBroker::new())
            } else {
                kite.clone()
            };

            let mut engine = TrailingStopEngine::new(config, store, kite, executor).await;
            if let Some(journal) = journal {
                engine = engine.with_journal(journal);
            }
            let engine = Arc::new(engine);

            let tracked = engine.positions().await.len();
            if tracked == 0 {
                println!("No positions tracked. Use 'autotrail register <symbol>' first.");
                return Ok(());
            }

            let poll_interval = engine.config().poll_interval();
            info!(
                interval = poll_interval.as_secs(),
                dry_run = dry_run,
                tracked = tracked,
                "Starting trailing stop engine"
            );

            println!("\n=== Autotrail ===");
            println!("Polling interval: {}s", poll_interval.as_secs());
            println!("Mode: {}", if dry_run { "DRY RUN (live quotes, paper exits)" } else { "LIVE TRADING" });
            println!("Tracked positions: {}", tracked);
            println!("\nPress Ctrl+C to stop.\n");

            let handle = engine.start(poll_interval)?;

            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            engine.stop();
            handle.await.context("Engine loop panicked")?;
            engine.flush().await.context("Failed to save positions on shutdown")?;

            println!("\n{}", engine.stats().await);
        }

        Commands::History { limit } => {
            let Some(journal) = journal else {
                println!("Trade history requires a sqlite store (--store sqlite:...).");
                return Ok(());
            };

            let trades = journal.recent_exits(limit).await?;
            if trades.is_empty() {
                println!("No closed positions yet.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<10} {:>8} {:>12} {:>12} {:>12} {:>12}  {}",
                "SYMBOL", "OUTCOME", "QTY", "ENTRY", "STOP", "OBSERVED", "P&L@STOP", "CLOSED"
            );
            println!("{}", "-".repeat(118));

            for trade in trades {
                println!(
                    "{:<20} {:<10} {:>8} {:>12} {:>12} {:>12} {:>12.2}  {}",
                    truncate(&trade.symbol, 20),
                    trade.outcome.as_str(),
                    trade.quantity,
                    trade.entry_price,
                    trade.stop_price,
                    trade.observed_price,
                    trade.realized_at_stop(),
                    trade.closed_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Commands::SetToken { token } => {
            let mut registry = PositionRegistry::load(store).await;
            let cleared = token.is_none();
            registry.set_credential_token(token).await;
            if registry.is_dirty() {
                anyhow::bail!("Credential token could not be saved");
            }
            println!("{}", if cleared { "Credential token cleared" } else { "Credential token saved" });
        }

        Commands::Config => {
            println!("\n=== Engine Configuration ===\n");
            println!("  Poll Interval:        {}s", config.poll_interval_secs);
            println!("  Price Timeout:        {}ms", config.price_timeout_ms);
            println!("  Order Timeout:        {}ms", config.order_timeout_ms);
            println!(
                "  Max Exit Attempts:    {}",
                config
                    .max_exit_attempts
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unlimited".to_string())
            );
            println!("  Concurrent Quotes:    {}", config.concurrent_quotes);

            println!("\n=== Storage ===\n");
            println!("  Store:                {}", cli.store);
            println!("  Trade History:        {}", if journal.is_some() { "enabled" } else { "disabled" });

            println!("\n=== Broker ===\n");
            println!(
                "  Base URL:             {}",
                std::env::var("KITE_BASE_URL").unwrap_or_else(|_| KITE_API_URL.to_string())
            );
            println!(
                "  Exchange:             {}",
                std::env::var("KITE_EXCHANGE").unwrap_or_else(|_| "NSE".to_string())
            );
            println!(
                "  API Key:              {}",
                if std::env::var("KITE_API_KEY").is_ok() { "set" } else { "missing" }
            );
        }
    }

    Ok(())
}

/// Open the snapshot store and, for sqlite, the trade journal alongside it.
async fn open_store(location: &str) -> Result<(Arc<dyn ConfigStore>, Option<Arc<dyn TradeJournal>>)> {
    if location.starts_with("sqlite:") {
        let store = Arc::new(
            SqliteStore::new(location)
                .await
                .with_context(|| format!("Failed to open store {}", location))?,
        );
        Ok((store.clone(), Some(store)))
    } else {
        Ok((Arc::new(JsonFileStore::new(location)), None))
    }
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_dry_run_help_mentions_live_quotes() {
        let mut cli = Cli::command();
        let run = cli.find_subcommand_mut("run").unwrap();
        let dry_run = run
            .get_arguments()
            .find(|arg| arg.get_id() == "dry_run")
            .unwrap();

        let help = dry_run.get_long_help().or(dry_run.get_help()).unwrap().to_string();
        assert!(help.contains("KITE_API_KEY"));
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from(["autotrail", "--store", "positions.json", "run", "--dry-run", "-i", "3"]).unwrap();
        assert_eq!(cli.store, "positions.json");
        match cli.command {
            Commands::Run { interval, dry_run, max_exit_attempts } => {
                assert_eq!(interval, Some(3));
                assert!(dry_run);
                assert!(max_exit_attempts.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("RELIANCE", 20), "RELIANCE");
        assert_eq!(truncate("ABCDEFGHIJ", 6), "ABC...");
    }
}
