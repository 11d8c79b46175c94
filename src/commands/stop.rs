//! Stop order command implementation

use anyhow::{bail, Result};

use futures_strategies::orders::OrderExecutor;
use futures_strategies::validation::validate_side;
use futures_strategies::Config;

use super::{connect, orders::print_order};
use crate::StopArgs;

pub async fn run(config: &Config, args: StopArgs) -> Result<()> {
    let side = validate_side(&args.side)?;

    if (args.trailing || args.stop_market) && args.limit.is_some() {
        bail!("LIMIT price only applies to stop-limit orders");
    }

    let executor = OrderExecutor::new(connect(config).await?);

    let order = if args.trailing {
        executor
            .trailing_stop(
                &args.symbol,
                side,
                args.quantity,
                args.price,
                args.activation,
                args.reduce_only,
            )
            .await?
    } else if args.stop_market {
        executor
            .stop_market(&args.symbol, side, args.quantity, args.price, args.reduce_only)
            .await?
    } else {
        let Some(limit) = args.limit else {
            bail!("Stop-limit orders need a LIMIT price (or use --stop-market / --trailing)");
        };
        executor
            .stop_limit(
                &args.symbol,
                side,
                args.quantity,
                args.price,
                limit,
                args.reduce_only,
            )
            .await?
    };

    print_order(&order);
    Ok(())
}
