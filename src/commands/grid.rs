//! Grid command implementation

use anyhow::{bail, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use futures_strategies::strategies::grid::{GridConfig, GridSummary};
use futures_strategies::strategies::{GridController, GridParams};
use futures_strategies::Config;

use super::{connect, rule};
use crate::{GridAction, GridShape};

pub async fn run(config: &Config, action: GridAction, token: &CancellationToken) -> Result<()> {
    match action {
        GridAction::Create {
            grid,
            no_rebalance,
            monitor,
            interval,
            max_hours,
        } => {
            let interval = poll_interval(config, interval)?;
            let max_runtime = max_runtime(max_hours)?;
            let mut controller = GridController::new(connect(config).await?);

            let params = params(&grid, !no_rebalance);
            let created = controller.create(&grid.symbol, params).await?;
            print_grid(created);
            let symbol = created.symbol.clone();

            if monitor {
                let summary = controller
                    .monitor(&symbol, interval, max_runtime, token)
                    .await?;
                print_summary(&summary);
            } else {
                info!(symbol = %symbol, "Grid placed; run `grid monitor` to rebalance fills");
            }
            Ok(())
        }
        GridAction::Monitor {
            grid,
            interval,
            max_hours,
        } => {
            let interval = poll_interval(config, interval)?;
            let max_runtime = max_runtime(max_hours)?;
            let mut controller = GridController::new(connect(config).await?);

            let adopted = controller.adopt(&grid.symbol, params(&grid, true)).await?;
            print_grid(adopted);
            let symbol = adopted.symbol.clone();

            let summary = controller
                .monitor(&symbol, interval, max_runtime, token)
                .await?;
            print_summary(&summary);
            Ok(())
        }
        GridAction::Stop { symbol } => {
            let mut controller = GridController::new(connect(config).await?);
            let outcome = controller.stop(&symbol).await?;
            if !outcome.orders_cancelled {
                bail!("Failed to cancel open orders for {}", symbol);
            }
            println!("All open orders on {} cancelled", symbol.trim().to_uppercase());
            Ok(())
        }
    }
}

fn params(grid: &GridShape, auto_rebalance: bool) -> GridParams {
    GridParams {
        lower_price: grid.lower,
        upper_price: grid.upper,
        num_grids: grid.grids,
        quantity_per_level: grid.quantity,
        auto_rebalance,
    }
}

fn poll_interval(config: &Config, interval: Option<u64>) -> Result<Duration> {
    let secs = interval.unwrap_or(config.grid.poll_interval_secs);
    if secs == 0 {
        bail!("Poll interval must be at least 1 second");
    }
    Ok(Duration::from_secs(secs))
}

fn max_runtime(max_hours: Option<f64>) -> Result<Option<Duration>> {
    match max_hours {
        None => Ok(None),
        Some(hours) if hours.is_finite() && hours > 0.0 => {
            Ok(Some(Duration::from_secs_f64(hours * 3600.0)))
        }
        Some(hours) => bail!("--max-hours must be positive, got {}", hours),
    }
}

fn print_grid(grid: &GridConfig) {
    println!("\n{}", rule());
    println!("GRID {}", grid.symbol);
    println!("{}", rule());
    println!("Range:              {:.2} - {:.2}", grid.lower_price, grid.upper_price);
    println!("Levels:             {}", grid.levels.len());
    println!("Step:               {:.2}", grid.step());
    println!("Quantity/level:     {}", grid.quantity_per_level);
    println!("Entry price:        {:.2}", grid.entry_price);
    println!("Buy orders:         {}", grid.buy_orders.len());
    println!("Sell orders:        {}", grid.sell_orders.len());
    println!("Capital estimate:   {:.2} USDT", grid.capital_estimate);
    println!("Auto rebalance:     {}", grid.auto_rebalance);
    println!("{}", rule());
}

fn print_summary(summary: &GridSummary) {
    println!("\n{}", rule());
    println!("GRID SUMMARY {}", summary.symbol);
    println!("{}", rule());
    println!("Runtime:            {:.1} min", summary.runtime.as_secs_f64() / 60.0);
    println!("Polls:              {}", summary.iterations);
    println!("Trades executed:    {}", summary.trades_executed);
    println!("Estimated profit:   {:.4} USDT", summary.total_profit);
    println!("Active buys:        {}", summary.active_buys);
    println!("Active sells:       {}", summary.active_sells);
    println!("Stopped by:         {:?}", summary.exit);
    println!("{}", rule());
}
