//! Futures strategies - main entry point
//!
//! Subcommands:
//! - grid: create, monitor or stop a grid
//! - oco: place or monitor a take-profit / stop-loss pair
//! - stop: stop-limit, stop-market and trailing stop orders
//! - twap: time-sliced execution
//! - market / limit: single orders

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use futures_strategies::Config;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "futures-strategies")]
#[command(about = "Grid, OCO and TWAP strategies for Binance USDT-M futures", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Grid trading
    Grid {
        #[command(subcommand)]
        action: GridAction,
    },

    /// One-cancels-other take-profit / stop-loss pair
    ///
    ///   oco SYMBOL SIDE QTY TP SL [--monitor]
    ///   oco --position SYMBOL TP% SL% [--monitor]
    ///   oco --monitor SYMBOL TP_ID SL_ID
    Oco(OcoArgs),

    /// Stop-limit, stop-market or trailing stop order
    ///
    ///   stop SYMBOL SIDE QTY STOP LIMIT
    ///   stop --stop-market SYMBOL SIDE QTY STOP
    ///   stop --trailing SYMBOL SIDE QTY CALLBACK [--activation PRICE]
    Stop(StopArgs),

    /// Time-weighted execution in equal or randomized slices
    Twap(TwapArgs),

    /// Market order
    Market {
        symbol: String,
        side: String,
        quantity: f64,
    },

    /// Limit order
    Limit {
        symbol: String,
        side: String,
        quantity: f64,
        price: f64,

        /// Time in force (GTC, IOC, FOK)
        #[arg(long, default_value = "GTC")]
        tif: String,

        /// Maker only, rejected instead of crossing the book
        #[arg(long)]
        post_only: bool,

        #[arg(long)]
        reduce_only: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum GridAction {
    /// Lay out a new grid and place its orders
    Create {
        #[command(flatten)]
        grid: GridShape,

        /// Do not replace filled orders
        #[arg(long)]
        no_rebalance: bool,

        /// Keep running and rebalance after setup
        #[arg(long)]
        monitor: bool,

        /// Poll interval in seconds (default from config)
        #[arg(long)]
        interval: Option<u64>,

        /// Stop monitoring after this many hours
        #[arg(long)]
        max_hours: Option<f64>,
    },

    /// Take over grid orders already on the book and rebalance them
    Monitor {
        #[command(flatten)]
        grid: GridShape,

        #[arg(long)]
        interval: Option<u64>,

        #[arg(long)]
        max_hours: Option<f64>,
    },

    /// Cancel every open order on the symbol
    Stop { symbol: String },
}

#[derive(Args, Debug, Clone)]
pub struct GridShape {
    pub symbol: String,
    pub lower: f64,
    pub upper: f64,
    /// Number of grid levels (2-50)
    pub grids: usize,
    /// Quantity per level
    pub quantity: f64,
}

#[derive(Args, Debug)]
pub struct OcoArgs {
    /// Derive quantity and prices from the open position (SYMBOL TP% SL%)
    #[arg(long)]
    pub position: bool,

    /// Monitor the pair; alone with SYMBOL TP_ID SL_ID, watch an existing pair
    #[arg(long)]
    pub monitor: bool,

    /// Hedge-mode position side (BOTH, LONG, SHORT)
    #[arg(long, default_value = "BOTH")]
    pub position_side: String,

    /// Poll interval in seconds (default from config)
    #[arg(long)]
    pub interval: Option<u64>,

    #[arg(required = true, num_args = 3..=5)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Stop-market instead of stop-limit
    #[arg(long, conflicts_with = "trailing")]
    pub stop_market: bool,

    /// Trailing stop; the price argument is the callback rate in percent
    #[arg(long)]
    pub trailing: bool,

    /// Trailing stop activation price
    #[arg(long, requires = "trailing")]
    pub activation: Option<f64>,

    #[arg(long)]
    pub reduce_only: bool,

    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    /// Stop price, or callback rate with --trailing
    pub price: f64,
    /// Limit price for stop-limit orders
    pub limit: Option<f64>,
}

#[derive(Args, Debug)]
pub struct TwapArgs {
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    /// Number of slices (1-100)
    pub orders: usize,
    /// Seconds between slices
    pub interval: u64,

    /// Use IOC limit slices capped at this price
    #[arg(long)]
    pub limit: Option<f64>,

    /// Randomize both timing and slice sizes
    #[arg(long)]
    pub randomize: bool,

    #[arg(long)]
    pub randomize_time: bool,

    #[arg(long)]
    pub randomize_qty: bool,
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!("{}.log", command_name);
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy HTTP crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(verbose)
        .with_file(verbose)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Log file: {}", log_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Grid { .. } => "grid",
        Commands::Oco(_) => "oco",
        Commands::Stop(_) => "stop",
        Commands::Twap(_) => "twap",
        Commands::Market { .. } => "market",
        Commands::Limit { .. } => "limit",
    };
    setup_logging(cli.verbose, command_name)?;

    let config = Config::load(cli.config.as_deref())?;

    // Ctrl+C interrupts waits and polling loops
    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    match cli.command {
        Commands::Grid { action } => commands::grid::run(&config, action, &token).await,
        Commands::Oco(args) => commands::oco::run(&config, args, &token).await,
        Commands::Stop(args) => commands::stop::run(&config, args).await,
        Commands::Twap(args) => commands::twap::run(&config, args, &token).await,
        Commands::Market {
            symbol,
            side,
            quantity,
        } => commands::orders::market(&config, &symbol, &side, quantity).await,
        Commands::Limit {
            symbol,
            side,
            quantity,
            price,
            tif,
            post_only,
            reduce_only,
        } => {
            commands::orders::limit(
                &config,
                &symbol,
                &side,
                quantity,
                price,
                &tif,
                post_only,
                reduce_only,
            )
            .await
        }
    }
}
