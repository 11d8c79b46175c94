//! TWAP command implementation

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use futures_strategies::strategies::{TwapController, TwapPricing, TwapReport, TwapRequest};
use futures_strategies::validation::validate_side;
use futures_strategies::Config;

use super::{connect, rule};
use crate::TwapArgs;

pub async fn run(config: &Config, args: TwapArgs, token: &CancellationToken) -> Result<()> {
    let request = TwapRequest {
        symbol: args.symbol,
        side: validate_side(&args.side)?,
        total_quantity: args.quantity,
        num_orders: args.orders,
        interval_secs: args.interval,
        pricing: match args.limit {
            Some(limit) => TwapPricing::Limit(limit),
            None => TwapPricing::Market,
        },
        randomize_timing: args.randomize || args.randomize_time,
        randomize_quantity: args.randomize || args.randomize_qty,
    };

    let mut controller = TwapController::new(connect(config).await?);
    let report = controller.execute(&request, token).await?;
    print_report(&report);

    if report.interrupted {
        bail!(
            "TWAP interrupted after {} of {} orders",
            report.executed_orders.len() + report.failed_chunks,
            report.planned
        );
    }
    if report.executed_orders.is_empty() {
        bail!("No TWAP order was executed");
    }
    if report.failed_chunks > 0 {
        warn!(
            failed = report.failed_chunks,
            planned = report.planned,
            "TWAP finished with failed orders"
        );
    }
    Ok(())
}

fn print_report(report: &TwapReport) {
    println!("\n{}", rule());
    println!("TWAP {} {}", report.side, report.symbol);
    println!("{}", rule());
    println!("Target quantity:    {}", report.target_quantity);
    println!("Executed quantity:  {}", report.executed_quantity());
    println!("Fill rate:          {:.1}%", report.fill_rate() * 100.0);
    match report.vwap() {
        Some(vwap) => println!("VWAP:               {:.4}", vwap),
        None => println!("VWAP:               n/a"),
    }
    println!("Orders executed:    {}/{}", report.executed_orders.len(), report.planned);
    println!("Orders failed:      {}", report.failed_chunks);
    println!("{}", rule());
}
