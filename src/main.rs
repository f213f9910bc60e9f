//! Proportional position copier
//!
//! Mirrors a source wallet's open positions into a user account by
//! percentage of portfolio, scaled to the capital the user allocates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use position_copier::api::{DataClient, MarketData, PaperExchange, PaperPortfolio, PortfolioProvider};
use position_copier::db::Database;
use position_copier::models::{PositionCopyRequest, PositionSnapshot, ScalingMode};
use position_copier::trading::{compute_distribution_scaled, CopyEngine, ReplicationConfig};

/// Proportional copy-trading CLI.
#[derive(Parser)]
#[command(name = "poscopier")]
#[command(about = "Copy a wallet's positions by percentage of portfolio", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./poscopier.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON config file (defaults and COPIER_* environment variables otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Offline fixture with wallet positions and prices instead of the data API
    #[arg(short, long)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a source wallet's percentage distribution and proportional targets
    Distribution {
        /// Source wallet address
        wallet: String,

        /// Available balance in quote currency
        #[arg(short, long)]
        balance: Decimal,

        /// Fraction of the balance to commit (0-1]
        #[arg(short = 'a', long, default_value = "1")]
        fraction: Decimal,
    },

    /// Build a sized, validated preview without placing orders
    Preview {
        /// Source wallet address
        wallet: String,

        /// Your account address
        #[arg(long, default_value = "local")]
        account: String,

        #[arg(short, long)]
        balance: Decimal,

        #[arg(short = 'a', long, default_value = "1")]
        fraction: Decimal,

        /// Override scaling mode (proportional, minimum_enforced)
        #[arg(short, long)]
        mode: Option<String>,
    },

    /// Preview, then execute on the paper exchange
    Execute {
        wallet: String,

        #[arg(long, default_value = "local")]
        account: String,

        #[arg(short, long)]
        balance: Decimal,

        #[arg(short = 'a', long, default_value = "1")]
        fraction: Decimal,

        #[arg(short, long)]
        mode: Option<String>,

        /// Simulated slippage (0-1)
        #[arg(long, default_value = "0")]
        slippage: Decimal,

        /// Confirm the preview and place orders
        #[arg(short, long)]
        yes: bool,
    },

    /// Compare copied wallets against their stored target ratios
    Rebalance {
        #[arg(long, default_value = "local")]
        account: String,

        /// Check a single wallet (all tracked wallets otherwise)
        wallet: Option<String>,

        #[arg(short, long)]
        balance: Decimal,
    },

    /// Show recent execution batches
    History {
        #[arg(long)]
        account: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show current configuration
    Config,
}

/// Offline wallets and prices.
#[derive(Debug, Default, Deserialize)]
struct Fixture {
    #[serde(default)]
    wallets: HashMap<String, Vec<PositionSnapshot>>,
    #[serde(default)]
    prices: HashMap<String, Decimal>,
}

impl Fixture {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse fixture {}", path.display()))
    }
}

struct Sources {
    portfolio: Arc<dyn PortfolioProvider>,
    market: Arc<dyn MarketData>,
}

fn sources(config: &ReplicationConfig, fixture: Option<&Path>) -> Result<Sources> {
    match fixture {
        Some(path) => {
            let fixture = Fixture::load(path)?;
            info!(
                wallets = fixture.wallets.len(),
                prices = fixture.prices.len(),
                "Using offline fixture"
            );
            Ok(Sources {
                portfolio: Arc::new(PaperPortfolio::from_wallets(fixture.wallets)),
                market: Arc::new(PaperExchange::new().with_prices(fixture.prices)),
            })
        }
        None => {
            let client = Arc::new(DataClient::from_config(config)?);
            info!(url = %config.data_api_url, "Using data API");
            Ok(Sources {
                portfolio: client.clone(),
                market: client,
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => ReplicationConfig::from_file(path)?,
        None => ReplicationConfig::from_env()?,
    };

    match cli.command {
        Commands::Distribution {
            wallet,
            balance,
            fraction,
        } => {
            let sources = sources(&config, cli.fixture.as_deref())?;
            let positions = sources.portfolio.get_positions(&wallet).await?;
            let request = PositionCopyRequest::new("local", &wallet, positions, balance, fraction)?;
            let dist = compute_distribution_scaled(&request, config.notional_scale)?;

            println!("\n=== Distribution: {} ===", wallet);
            println!("Source total: ${:.2}   Allocated: ${:.2}", dist.source_total, dist.allocated_capital);
            println!("\n{:<10} {:<6} {:>5} {:>9} {:>14}", "SYMBOL", "SIDE", "LEV", "PCT", "TARGET $");
            println!("{}", "-".repeat(48));
            for e in &dist.entries {
                println!(
                    "{:<10} {:<6} {:>4}x {:>8.3}% {:>14.2}",
                    e.symbol,
                    e.side,
                    e.leverage,
                    e.percentage_of_portfolio * Decimal::ONE_HUNDRED,
                    e.target_notional
                );
            }
        }

        Commands::Preview {
            wallet,
            account,
            balance,
            fraction,
            mode,
        } => {
            if let Some(mode) = mode {
                config.scaling_mode = ScalingMode::from_str(&mode);
            }
            let sources = sources(&config, cli.fixture.as_deref())?;
            let engine = CopyEngine::new(
                config,
                sources.portfolio,
                sources.market.clone(),
                Arc::new(PaperExchange::new().with_quote_source(sources.market)),
            );
            engine.ledger().sync_balance(&account, balance).await;

            let request = engine.prepare_request(&account, &wallet, fraction).await?;
            let preview = engine.preview(&request).await?;
            println!("\n{}", preview);

            if preview.diverges_from_proportional() {
                println!("\nNote: entries raised to the platform minimum change your allocation ratio.");
            }
        }

        Commands::Execute {
            wallet,
            account,
            balance,
            fraction,
            mode,
            slippage,
            yes,
        } => {
            if let Some(mode) = mode {
                config.scaling_mode = ScalingMode::from_str(&mode);
            }
            let db = Database::new(&cli.database).await?;
            let sources = sources(&config, cli.fixture.as_deref())?;
            let exchange = PaperExchange::new()
                .with_quote_source(sources.market.clone())
                .with_slippage(slippage);

            let engine = CopyEngine::new(config, sources.portfolio, sources.market, Arc::new(exchange))
                .with_store(db);
            engine.ledger().sync_balance(&account, balance).await;

            let request = engine.prepare_request(&account, &wallet, fraction).await?;
            let preview = engine.preview(&request).await?;
            println!("\n{}", preview);

            if !yes {
                println!("\nDry run. Re-run with --yes to place these orders.");
                return Ok(());
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                warn!("Cancellation requested, finishing in-flight order");
                on_signal.cancel();
            });

            let batch = engine.execute(&preview, &cancel).await?;
            println!("\n{}", batch);
        }

        Commands::Rebalance {
            account,
            wallet,
            balance,
        } => {
            let db = Database::new(&cli.database).await?;
            let sources = sources(&config, cli.fixture.as_deref())?;
            let threshold = config.rebalance_threshold;
            let engine = CopyEngine::new(
                config,
                sources.portfolio,
                sources.market.clone(),
                Arc::new(PaperExchange::new().with_quote_source(sources.market)),
            )
            .with_store(db);
            engine.restore_ratios().await?;
            engine.ledger().sync_balance(&account, balance).await;

            let proposals = match wallet {
                Some(wallet) => {
                    let proposal = engine.check_rebalance(&account, &wallet).await?;
                    vec![(wallet, proposal)]
                }
                None => engine.check_rebalances(&account).await?,
            };

            if proposals.is_empty() {
                println!("All copied wallets within {:.2}% of their target ratio.", threshold * Decimal::ONE_HUNDRED);
                return Ok(());
            }

            for (wallet, proposal) in proposals {
                println!("\n=== {} ===", wallet);
                println!("{}", proposal);
                if proposal.exceeds(threshold) {
                    println!("Drift exceeds threshold. Run `execute {}` to copy the current distribution.", wallet);
                }
            }
        }

        Commands::History { account, limit } => {
            let db = Database::new(&cli.database).await?;
            let batches = db.recent_batches(account.as_deref(), limit).await?;

            if batches.is_empty() {
                println!("No batches recorded.");
                return Ok(());
            }

            println!(
                "\n{:<38} {:<14} {:<16} {:>4} {:>4} {:>12}  {}",
                "BATCH", "ACCOUNT", "STATUS", "OK", "FAIL", "FILLED $", "COMPLETED"
            );
            println!("{}", "-".repeat(120));
            for b in batches {
                println!(
                    "{:<38} {:<14} {:<16} {:>4} {:>4} {:>12}  {}",
                    b.id,
                    truncate(&b.account, 14),
                    b.status,
                    b.succeeded,
                    b.failed,
                    b.filled_notional,
                    b.completed_at
                );
            }

            let (total, ok, partial, aborted) = db.batch_stats().await?;
            println!("\nTotal: {}   All succeeded: {}   Partial: {}   Aborted: {}", total, ok, partial, aborted);
        }

        Commands::Config => {
            println!("\n=== Replication Configuration ===\n");
            println!("Platform:             {}", config.platform);
            println!("Scaling Mode:         {}", config.scaling_mode);
            println!("Default Minimum:      ${}", config.default_minimum_notional);
            for m in &config.minimums {
                println!("  {:<10} {:<10} ${}", m.platform, m.symbol, m.minimum_notional);
            }
            println!("Notional Scale:       {} dp", config.notional_scale);
            println!("Size Scale:           {} dp", config.size_scale);
            println!("Order Timeout:        {}s", config.order_timeout_secs);
            println!("Rebalance Threshold:  {}%", config.rebalance_threshold * Decimal::ONE_HUNDRED);
            println!("Max Price Age:        {}s", config.max_price_age_secs);
            println!("Data API:             {}", config.data_api_url);
        }
    }

    Ok(())
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
