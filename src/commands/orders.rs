//! Market and limit order commands

use anyhow::Result;

use futures_strategies::orders::{LimitOptions, OrderExecutor};
use futures_strategies::validation::validate_side;
use futures_strategies::{Config, Order, TimeInForce};

use super::{connect, rule};

pub async fn market(config: &Config, symbol: &str, side: &str, quantity: f64) -> Result<()> {
    let side = validate_side(side)?;
    let executor = OrderExecutor::new(connect(config).await?);
    let order = executor.market(symbol, side, quantity).await?;
    print_order(&order);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn limit(
    config: &Config,
    symbol: &str,
    side: &str,
    quantity: f64,
    price: f64,
    tif: &str,
    post_only: bool,
    reduce_only: bool,
) -> Result<()> {
    let side = validate_side(side)?;
    let time_in_force: TimeInForce = tif.parse().map_err(anyhow::Error::msg)?;
    let options = LimitOptions {
        time_in_force,
        post_only,
        reduce_only,
    };

    let executor = OrderExecutor::new(connect(config).await?);
    let order = executor.limit(symbol, side, quantity, price, options).await?;
    print_order(&order);
    Ok(())
}

pub fn print_order(order: &Order) {
    println!("\n{}", rule());
    println!("ORDER {}", order.id);
    println!("{}", rule());
    println!("Symbol:             {}", order.symbol);
    println!("Side:               {}", order.side);
    println!("Type:               {}", order.order_type);
    println!("Status:             {:?}", order.status);
    println!("Quantity:           {}", order.quantity);
    if let Some(price) = order.price {
        println!("Price:              {}", price);
    }
    if let Some(stop) = order.stop_price {
        println!("Stop price:         {}", stop);
    }
    println!("Executed:           {}", order.executed_quantity);
    if let Some(avg) = order.average_price {
        println!("Average price:      {}", avg);
    }
    if order.reduce_only {
        println!("Reduce only:        yes");
    }
    println!("{}", rule());
}
