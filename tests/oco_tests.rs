//! OCO controller against the in-memory exchange

mod common;

use approx::assert_relative_eq;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{one_way_position, FakeGateway};
use futures_strategies::strategies::oco::OcoController;
use futures_strategies::strategies::{MonitorExit, OcoState};
use futures_strategies::{OrderType, PositionSide, Side, StrategyError, Symbol, TimeInForce};

fn btc() -> Symbol {
    Symbol::new("BTCUSDT")
}

async fn placed_pair(fake: &FakeGateway) -> (OcoController, u64, u64) {
    let mut controller = OcoController::new(fake.handle());
    let group = controller
        .execute(
            "BTCUSDT",
            Side::Sell,
            0.01,
            105000.0,
            95000.0,
            PositionSide::Both,
        )
        .await
        .unwrap();
    (controller, group.take_profit_order_id, group.stop_loss_order_id)
}

// =============================================================================
// Placement
// =============================================================================

#[tokio::test]
async fn test_execute_places_reduce_only_pair() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let (controller, tp, sl) = placed_pair(&fake).await;

    let placed = fake.placed();
    assert_eq!(placed.len(), 2);

    let take_profit = &placed[0];
    assert_eq!(take_profit.order_type, OrderType::Limit);
    assert_eq!(take_profit.time_in_force, Some(TimeInForce::GTC));
    assert_eq!(take_profit.price, Some(105000.0));
    assert!(take_profit.reduce_only);

    let stop_loss = &placed[1];
    assert_eq!(stop_loss.order_type, OrderType::StopMarket);
    assert_eq!(stop_loss.stop_price, Some(95000.0));
    assert!(stop_loss.reduce_only);

    assert_eq!(fake.open_ids(), HashSet::from([tp, sl]));
    assert!(controller.has_groups(&btc()));
}

#[tokio::test]
async fn test_hedge_mode_uses_position_side() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let mut controller = OcoController::new(fake.handle());

    controller
        .execute(
            "BTCUSDT",
            Side::Sell,
            0.01,
            105000.0,
            95000.0,
            PositionSide::Long,
        )
        .await
        .unwrap();

    for request in fake.placed() {
        assert_eq!(request.position_side, Some(PositionSide::Long));
        assert!(!request.reduce_only);
    }
}

#[tokio::test]
async fn test_failed_stop_loss_rolls_back_take_profit() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    fake.fail_order_type(OrderType::StopMarket);
    let mut controller = OcoController::new(fake.handle());

    let err = controller
        .execute(
            "BTCUSDT",
            Side::Sell,
            0.01,
            105000.0,
            95000.0,
            PositionSide::Both,
        )
        .await
        .unwrap_err();

    match err {
        StrategyError::PartialPlacementRollback {
            failed_leg,
            placed_order_id,
            rolled_back,
            ..
        } => {
            assert_eq!(failed_leg, "stop-loss");
            assert!(rolled_back);
            // Exactly one cancel, for the take-profit that did land
            assert_eq!(fake.cancelled(), vec![placed_order_id]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(fake.open().is_empty());
    assert!(!controller.has_groups(&btc()));
}

#[tokio::test]
async fn test_rollback_failure_is_reported() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    fake.fail_order_type(OrderType::StopMarket);
    fake.fail_cancels(true);
    let mut controller = OcoController::new(fake.handle());

    let err = controller
        .execute(
            "BTCUSDT",
            Side::Sell,
            0.01,
            105000.0,
            95000.0,
            PositionSide::Both,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StrategyError::PartialPlacementRollback {
            rolled_back: false,
            ..
        }
    ));
    assert_eq!(fake.cancelled().len(), 1);
    assert_eq!(fake.open().len(), 1);
}

#[tokio::test]
async fn test_failed_take_profit_places_nothing_else() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    fake.fail_order_type(OrderType::Limit);
    let mut controller = OcoController::new(fake.handle());

    let err = controller
        .execute(
            "BTCUSDT",
            Side::Sell,
            0.01,
            105000.0,
            95000.0,
            PositionSide::Both,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StrategyError::RejectedByExchange { .. }));
    assert_eq!(fake.place_attempts(), 1);
    assert!(fake.cancelled().is_empty());
}

#[tokio::test]
async fn test_wrong_side_prices_still_place() {
    // Take-profit below market for a SELL only warns
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let mut controller = OcoController::new(fake.handle());

    controller
        .execute(
            "BTCUSDT",
            Side::Sell,
            0.01,
            99000.0,
            95000.0,
            PositionSide::Both,
        )
        .await
        .unwrap();
    assert_eq!(fake.placed().len(), 2);
}

#[tokio::test]
async fn test_execute_validates_before_placing() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let mut controller = OcoController::new(fake.handle());

    let err = controller
        .execute("BTCUSDT", Side::Sell, 0.0, 105000.0, 95000.0, PositionSide::Both)
        .await
        .unwrap_err();
    assert!(matches!(err, StrategyError::Validation(_)));
    assert_eq!(fake.place_attempts(), 0);
}

// =============================================================================
// Position-derived pairs
// =============================================================================

#[tokio::test]
async fn test_execute_for_long_position() {
    let fake = FakeGateway::with_price("ETHUSDT", 3000.0);
    fake.add_position(one_way_position("ETHUSDT", 0.5, 3000.0));
    let mut controller = OcoController::new(fake.handle());

    controller
        .execute_for_position("ETHUSDT", 5.0, 2.0, PositionSide::Both)
        .await
        .unwrap();

    let placed = fake.placed();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0].side, Side::Sell);
    assert_relative_eq!(placed[0].quantity, 0.5);
    assert_relative_eq!(placed[0].price.unwrap(), 3150.0, max_relative = 1e-9);
    assert_relative_eq!(placed[1].stop_price.unwrap(), 2940.0, max_relative = 1e-9);
}

#[tokio::test]
async fn test_execute_for_short_position() {
    let fake = FakeGateway::with_price("ETHUSDT", 3000.0);
    fake.add_position(one_way_position("ETHUSDT", -2.0, 3000.0));
    let mut controller = OcoController::new(fake.handle());

    controller
        .execute_for_position("ETHUSDT", 10.0, 5.0, PositionSide::Both)
        .await
        .unwrap();

    let placed = fake.placed();
    assert_eq!(placed[0].side, Side::Buy);
    assert_relative_eq!(placed[0].quantity, 2.0);
    assert_relative_eq!(placed[0].price.unwrap(), 2700.0, max_relative = 1e-9);
    assert_relative_eq!(placed[1].stop_price.unwrap(), 3150.0, max_relative = 1e-9);
}

#[tokio::test]
async fn test_execute_for_missing_position() {
    let fake = FakeGateway::with_price("ETHUSDT", 3000.0);
    fake.add_position(one_way_position("BTCUSDT", 0.1, 100000.0));
    let mut controller = OcoController::new(fake.handle());

    let err = controller
        .execute_for_position("ETHUSDT", 5.0, 2.0, PositionSide::Both)
        .await
        .unwrap_err();
    assert!(matches!(err, StrategyError::NoOpenPosition(_)));
    assert_eq!(fake.place_attempts(), 0);
}

#[tokio::test]
async fn test_execute_for_position_when_exchange_is_down() {
    let fake = FakeGateway::with_price("ETHUSDT", 3000.0);
    fake.fail_positions(true);
    let mut controller = OcoController::new(fake.handle());

    let err = controller
        .execute_for_position("ETHUSDT", 5.0, 2.0, PositionSide::Both)
        .await
        .unwrap_err();
    assert!(matches!(err, StrategyError::GatewayUnavailable { .. }));
}

// =============================================================================
// Resolution
// =============================================================================

#[tokio::test]
async fn test_take_profit_fill_cancels_stop_loss_once() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let (mut controller, tp, sl) = placed_pair(&fake).await;

    fake.fill(tp).unwrap();
    let resolutions = controller.poll(&btc(), &fake.open_ids()).await;

    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].state, OcoState::TakeProfitFilled);
    assert_eq!(resolutions[0].cancelled_survivor, Some(true));
    assert_eq!(fake.cancelled(), vec![sl]);
    assert!(fake.open().is_empty());
    assert!(!controller.has_groups(&btc()));

    // Resolved pairs are not looked at again
    let resolutions = controller.poll(&btc(), &fake.open_ids()).await;
    assert!(resolutions.is_empty());
    assert_eq!(fake.cancelled().len(), 1);
}

#[tokio::test]
async fn test_stop_loss_fill_cancels_take_profit() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let (mut controller, tp, sl) = placed_pair(&fake).await;

    fake.fill(sl).unwrap();
    let resolutions = controller.poll(&btc(), &fake.open_ids()).await;

    assert_eq!(resolutions[0].state, OcoState::StopLossFilled);
    assert_eq!(fake.cancelled(), vec![tp]);
}

#[tokio::test]
async fn test_failed_survivor_cancel_still_drops_pair() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let (mut controller, tp, _sl) = placed_pair(&fake).await;
    fake.fail_cancels(true);

    fake.fill(tp).unwrap();
    let resolutions = controller.poll(&btc(), &fake.open_ids()).await;

    assert_eq!(resolutions[0].cancelled_survivor, Some(false));
    assert!(!controller.has_groups(&btc()));
    assert_eq!(fake.open().len(), 1);
}

#[tokio::test]
async fn test_both_legs_gone_cancels_nothing() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let (mut controller, tp, sl) = placed_pair(&fake).await;

    fake.fill(tp).unwrap();
    fake.fill(sl).unwrap();
    let resolutions = controller.poll(&btc(), &fake.open_ids()).await;

    assert_eq!(resolutions[0].state, OcoState::BothGone);
    assert_eq!(resolutions[0].cancelled_survivor, None);
    assert!(fake.cancelled().is_empty());
    assert!(!controller.has_groups(&btc()));
}

#[tokio::test]
async fn test_poll_leaves_other_symbols_alone() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let (mut controller, _tp, _sl) = placed_pair(&fake).await;
    let tracked = controller.track("ETHUSDT", 7, 8).unwrap();
    assert_eq!(tracked.symbol, Symbol::new("ETHUSDT"));
    assert_eq!(controller.groups().last(), Some(&tracked));

    let resolutions = controller.poll(&btc(), &fake.open_ids()).await;
    assert!(resolutions.is_empty());
    assert_eq!(controller.groups().len(), 2);
}

#[tokio::test]
async fn test_track_rejects_identical_ids() {
    let fake = FakeGateway::new();
    let mut controller = OcoController::new(fake.handle());

    assert!(matches!(
        controller.track("BTCUSDT", 5, 5),
        Err(StrategyError::Configuration(_))
    ));
    assert!(controller.groups().is_empty());
}

// =============================================================================
// Monitoring
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_monitor_completes_after_fill() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let (mut controller, tp, sl) = placed_pair(&fake).await;

    let filler = fake.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        filler.fill(sl);
    });

    let token = CancellationToken::new();
    let outcome = controller
        .monitor(&btc(), Duration::from_secs(2), &token)
        .await;

    assert_eq!(outcome.exit, MonitorExit::Completed);
    assert_eq!(outcome.resolutions.len(), 1);
    assert_eq!(outcome.resolutions[0].state, OcoState::StopLossFilled);
    assert_eq!(fake.cancelled(), vec![tp]);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_returns_on_cancel() {
    let fake = FakeGateway::with_price("BTCUSDT", 100000.0);
    let (mut controller, _tp, _sl) = placed_pair(&fake).await;
    fake.fail_open_orders(true);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        canceller.cancel();
    });

    let outcome = controller
        .monitor(&btc(), Duration::from_secs(2), &token)
        .await;

    assert_eq!(outcome.exit, MonitorExit::Cancelled);
    assert!(outcome.resolutions.is_empty());
    assert!(controller.has_groups(&btc()));
    assert!(fake.open_order_calls() >= 3);
}

#[tokio::test]
async fn test_monitor_with_nothing_to_watch() {
    let fake = FakeGateway::new();
    let mut controller = OcoController::new(fake.handle());
    let token = CancellationToken::new();

    let outcome = controller
        .monitor(&btc(), Duration::from_secs(2), &token)
        .await;
    assert_eq!(outcome.exit, MonitorExit::Completed);
    assert_eq!(fake.open_order_calls(), 0);
}
