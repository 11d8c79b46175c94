//! OCO command implementation

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use futures_strategies::strategies::oco::{OcoMonitorOutcome, OcoState};
use futures_strategies::strategies::{MonitorExit, OcoController, OcoGroup};
use futures_strategies::validation::validate_side;
use futures_strategies::{Config, OrderId, PositionSide};

use super::{connect, rule};
use crate::OcoArgs;

/// What the positional arguments ask for
#[derive(Debug, PartialEq)]
enum OcoMode {
    Place {
        symbol: String,
        side: String,
        quantity: f64,
        take_profit: f64,
        stop_loss: f64,
    },
    Position {
        symbol: String,
        take_profit_pct: f64,
        stop_loss_pct: f64,
    },
    Watch {
        symbol: String,
        take_profit_id: OrderId,
        stop_loss_id: OrderId,
    },
}

fn number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .ok()
        .with_context(|| format!("Invalid {}: {}", name, value))
}

fn parse_mode(position: bool, monitor: bool, args: &[String]) -> Result<OcoMode> {
    match (position, args) {
        (true, [symbol, tp, sl]) => Ok(OcoMode::Position {
            symbol: symbol.clone(),
            take_profit_pct: number(tp, "take-profit percentage")?,
            stop_loss_pct: number(sl, "stop-loss percentage")?,
        }),
        (false, [symbol, tp_id, sl_id]) if monitor => Ok(OcoMode::Watch {
            symbol: symbol.clone(),
            take_profit_id: number(tp_id, "take-profit order id")?,
            stop_loss_id: number(sl_id, "stop-loss order id")?,
        }),
        (false, [symbol, side, qty, tp, sl]) => Ok(OcoMode::Place {
            symbol: symbol.clone(),
            side: side.clone(),
            quantity: number(qty, "quantity")?,
            take_profit: number(tp, "take-profit price")?,
            stop_loss: number(sl, "stop-loss price")?,
        }),
        _ => bail!(
            "Usage: oco SYMBOL SIDE QTY TP SL [--monitor] | oco --position SYMBOL TP% SL% [--monitor] | oco --monitor SYMBOL TP_ID SL_ID"
        ),
    }
}

pub async fn run(config: &Config, args: OcoArgs, token: &CancellationToken) -> Result<()> {
    let mode = parse_mode(args.position, args.monitor, &args.args)?;
    let position_side: PositionSide = args
        .position_side
        .parse()
        .map_err(anyhow::Error::msg)?;
    let secs = args.interval.unwrap_or(config.oco.poll_interval_secs);
    if secs == 0 {
        bail!("Poll interval must be at least 1 second");
    }

    let mut controller = OcoController::new(connect(config).await?);

    let group = match mode {
        OcoMode::Place {
            symbol,
            side,
            quantity,
            take_profit,
            stop_loss,
        } => {
            let side = validate_side(&side)?;
            let group = controller
                .execute(&symbol, side, quantity, take_profit, stop_loss, position_side)
                .await?;
            print_group(&group);
            group
        }
        OcoMode::Position {
            symbol,
            take_profit_pct,
            stop_loss_pct,
        } => {
            let group = controller
                .execute_for_position(&symbol, take_profit_pct, stop_loss_pct, position_side)
                .await?;
            print_group(&group);
            group
        }
        OcoMode::Watch {
            symbol,
            take_profit_id,
            stop_loss_id,
        } => controller.track(&symbol, take_profit_id, stop_loss_id)?,
    };

    if !args.monitor {
        return Ok(());
    }

    let outcome = controller
        .monitor(&group.symbol, Duration::from_secs(secs), token)
        .await;
    print_outcome(&outcome);
    if outcome.exit == MonitorExit::Completed
        && outcome
            .resolutions
            .iter()
            .any(|r| r.cancelled_survivor == Some(false))
    {
        bail!("A surviving leg could not be cancelled; check open orders on {}", group.symbol);
    }
    Ok(())
}

fn print_group(group: &OcoGroup) {
    println!("\n{}", rule());
    println!("OCO {}", group.symbol);
    println!("{}", rule());
    println!("Take-profit order:  {}", group.take_profit_order_id);
    println!("Stop-loss order:    {}", group.stop_loss_order_id);
    println!("Created:            {}", group.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{}", rule());
}

fn print_outcome(outcome: &OcoMonitorOutcome) {
    for resolution in &outcome.resolutions {
        let what = match resolution.state {
            OcoState::TakeProfitFilled => "take-profit filled, stop-loss cancelled",
            OcoState::StopLossFilled => "stop-loss filled, take-profit cancelled",
            OcoState::BothGone => "both legs left the book",
            OcoState::BothOpen => "still open",
        };
        let cancel_note = match resolution.cancelled_survivor {
            Some(false) => " (cancel FAILED)",
            _ => "",
        };
        println!(
            "OCO {} / {}: {}{}",
            resolution.group.take_profit_order_id,
            resolution.group.stop_loss_order_id,
            what,
            cancel_note
        );
    }
    if outcome.exit == MonitorExit::Cancelled {
        println!("Monitoring interrupted; unresolved pairs are still on the book");
    }
}
