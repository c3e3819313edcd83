use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tradedesk_core::{
    Account, ConnectionConfig, ErrorKind, InMemoryAccountStore, PaperConfig, Side, TradeEvent,
    TradeEventSink, TradingConfig,
};
use tradedesk_execution::{
    BroadcastEventSink, ConnectionRegistry, ExecutionCoordinator, OpenPositionRequest, OrderStage,
    PreviewRequest,
};
use tradedesk_paper::{PaperConnectorFactory, PaperMarket};

struct Desk {
    market: Arc<PaperMarket>,
    registry: Arc<ConnectionRegistry>,
    coordinator: ExecutionCoordinator,
    events: BroadcastEventSink,
}

struct FailingSink;

#[async_trait::async_trait]
impl TradeEventSink for FailingSink {
    async fn publish(&self, _event: &TradeEvent) -> anyhow::Result<()> {
        anyhow::bail!("audit store unavailable")
    }
}

fn desk_with(trading: TradingConfig) -> Desk {
    desk_with_sink(trading, None)
}

/// Without a sink override the coordinator publishes to `Desk::events`.
fn desk_with_sink(trading: TradingConfig, sink: Option<Arc<dyn TradeEventSink>>) -> Desk {
    let market = Arc::new(PaperMarket::from_config(&PaperConfig::default()));
    let accounts = Arc::new(InMemoryAccountStore::with_accounts([
        Account::demo(1, "100001", "paper").with_default(true),
        Account::demo(2, "100002", "paper"),
    ]));
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(PaperConnectorFactory::new(market.clone())),
        accounts.clone(),
        ConnectionConfig::default(),
    ));
    let events = BroadcastEventSink::new(64);
    let sink = sink.unwrap_or_else(|| Arc::new(events.clone()));
    let coordinator = ExecutionCoordinator::new(registry.clone(), accounts, sink, trading);
    Desk {
        market,
        registry,
        coordinator,
        events,
    }
}

fn desk() -> Desk {
    desk_with(TradingConfig::default())
}

fn buy_eurusd() -> OpenPositionRequest {
    OpenPositionRequest::market("EURUSD", Side::Buy, dec!(0.1))
}

#[tokio::test]
async fn open_on_disconnected_account_reports_not_connected() {
    let desk = desk();
    let result = desk.coordinator.open_position(1, buy_eurusd()).await;

    assert!(!result.success);
    assert!(result.ticket.is_none());
    assert!(result.error.unwrap().contains("not connected"));
    assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    assert_eq!(result.stage, OrderStage::Requested);
}

#[tokio::test]
async fn open_after_disconnect_fails_fast() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();
    desk.registry.disconnect(1).await.unwrap();

    let result = desk.coordinator.open_position(1, buy_eurusd()).await;
    assert!(result.error.unwrap().contains("not connected"));
}

#[tokio::test]
async fn open_fills_and_publishes_event_with_defaults() {
    let desk = desk();
    let mut rx = desk.events.subscribe();
    desk.registry.connect(1, false).await.unwrap();

    let result = desk
        .coordinator
        .open_position(1, buy_eurusd().with_stops(Some(dec!(1.0980)), Some(dec!(1.1050))))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.stage, OrderStage::Filled);
    assert_eq!(result.price, Some(dec!(1.10000)));

    match rx.recv().await.unwrap() {
        TradeEvent::PositionOpened {
            account_id,
            ticket,
            magic,
            stop_loss,
            ..
        } => {
            assert_eq!(account_id, 1);
            assert_eq!(Some(ticket), result.ticket);
            assert_eq!(magic, TradingConfig::default().default_magic);
            assert_eq!(stop_loss, Some(dec!(1.0980)));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn volume_bounds_are_enforced_at_the_edges() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();

    let at_min = OpenPositionRequest::market("EURUSD", Side::Buy, dec!(0.01));
    assert!(desk.coordinator.open_position(1, at_min).await.success);

    let too_small = OpenPositionRequest::market("EURUSD", Side::Buy, dec!(0.001));
    let result = desk.coordinator.open_position(1, too_small).await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Validation));

    let too_big = OpenPositionRequest::market("EURUSD", Side::Sell, dec!(100.01));
    assert!(!desk.coordinator.open_position(1, too_big).await.success);
}

#[tokio::test]
async fn invalid_stops_never_reach_the_broker() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();

    let bad_sl = buy_eurusd().with_stops(Some(dec!(1.10000)), None);
    let result = desk.coordinator.open_position(1, bad_sl).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("stop loss"));

    let bad_tp = OpenPositionRequest::market("EURUSD", Side::Sell, dec!(0.1))
        .with_stops(None, Some(dec!(1.09990)));
    assert!(!desk.coordinator.open_position(1, bad_tp).await.success);

    let open = desk.coordinator.get_open_positions(Some(1), None).await.unwrap();
    assert!(open[0].positions.is_empty());
}

#[tokio::test]
async fn position_cap_blocks_new_orders() {
    let desk = desk_with(TradingConfig {
        max_open_positions: 2,
        ..TradingConfig::default()
    });
    desk.registry.connect(1, false).await.unwrap();

    assert!(desk.coordinator.open_position(1, buy_eurusd()).await.success);
    assert!(desk.coordinator.open_position(1, buy_eurusd()).await.success);
    let third = desk.coordinator.open_position(1, buy_eurusd()).await;
    assert!(third.error.unwrap().contains("limit"));
}

#[tokio::test]
async fn broker_rejection_is_execution_error() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();
    desk.market
        .update_faults(|f| f.reject_submits = Some((10019, "not enough money".to_string())))
        .await;

    let result = desk.coordinator.open_position(1, buy_eurusd()).await;
    assert_eq!(result.stage, OrderStage::Rejected);
    assert_eq!(result.error_kind, Some(ErrorKind::Execution));
    assert!(result.error.unwrap().contains("not enough money"));
}

#[tokio::test(start_paused = true)]
async fn submission_timeout_is_ambiguous_and_not_retried() {
    let desk = desk_with(TradingConfig {
        submit_timeout_secs: 1,
        default_magic: 777,
        ..TradingConfig::default()
    });
    desk.registry.connect(1, false).await.unwrap();
    desk.market
        .update_faults(|f| f.submit_latency = Duration::from_secs(5))
        .await;

    let result = desk.coordinator.open_position(1, buy_eurusd()).await;
    assert!(!result.success);
    assert_eq!(result.stage, OrderStage::Submitted);
    let error = result.error.unwrap();
    assert!(error.contains("outcome unknown"));
    assert!(error.contains("777"));

    // the slow fill was dropped with the timed-out call and nothing was resubmitted
    desk.market.update_faults(|f| f.submit_latency = Duration::ZERO).await;
    let open = desk.coordinator.get_open_positions(Some(1), None).await.unwrap();
    assert!(open[0].positions.is_empty());
}

#[tokio::test]
async fn close_reports_profit_and_publishes_event() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();
    let ticket = desk
        .coordinator
        .open_position(1, buy_eurusd())
        .await
        .ticket
        .unwrap();
    desk.market.set_quote("EURUSD", dec!(1.10100), dec!(1.10110)).await;

    let mut rx = desk.events.subscribe();
    let result = desk.coordinator.close_position(1, ticket).await;
    assert!(result.success);
    assert_eq!(result.profit, Some(dec!(10)));
    assert_eq!(result.price, Some(dec!(1.10100)));

    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type(), "position_closed");
    assert_eq!(event.ticket(), ticket);
}

#[tokio::test]
async fn close_unknown_ticket_fails() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();

    let result = desk.coordinator.close_position(1, 424_242).await;
    assert!(!result.success);
    assert_eq!(result.ticket, Some(424_242));
    assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    assert!(result.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn modify_validates_levels_and_keeps_unset_ones() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();
    let ticket = desk
        .coordinator
        .open_position(1, buy_eurusd().with_stops(Some(dec!(1.0950)), Some(dec!(1.1100))))
        .await
        .ticket
        .unwrap();

    let none = desk.coordinator.modify_position(1, ticket, None, None).await;
    assert!(none.error.unwrap().contains("nothing to modify"));

    let above_ask = desk
        .coordinator
        .modify_position(1, ticket, Some(dec!(1.1010)), None)
        .await;
    assert_eq!(above_ask.error_kind, Some(ErrorKind::Validation));

    let mut rx = desk.events.subscribe();
    let moved = desk
        .coordinator
        .modify_position(1, ticket, Some(dec!(1.0990)), None)
        .await;
    assert!(moved.success);

    match rx.recv().await.unwrap() {
        TradeEvent::PositionModified {
            stop_loss,
            take_profit,
            previous_stop_loss,
            ..
        } => {
            assert_eq!(stop_loss, Some(dec!(1.0990)));
            assert_eq!(take_profit, Some(dec!(1.1100)));
            assert_eq!(previous_stop_loss, Some(dec!(1.0950)));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let open = desk.coordinator.get_open_positions(Some(1), None).await.unwrap();
    assert_eq!(open[0].positions[0].stop_loss, Some(dec!(1.0990)));
}

#[tokio::test]
async fn bulk_close_continues_past_failures() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();

    let mut tickets = Vec::new();
    for _ in 0..5 {
        tickets.push(desk.coordinator.open_position(1, buy_eurusd()).await.ticket.unwrap());
    }
    let failing = [tickets[1], tickets[3]];
    desk.market
        .update_faults(|f| f.close_failures.extend(failing))
        .await;

    let report = desk.coordinator.bulk_close(1, None).await.unwrap();
    assert_eq!(report.total, 5);
    assert_eq!(report.success_count, 3);
    assert_eq!(report.fail_count, 2);
    assert_eq!(report.success_count + report.fail_count, report.total);
    assert_eq!(report.results.len(), 5);

    let failed: Vec<_> = report
        .results
        .iter()
        .filter(|r| !r.success)
        .filter_map(|r| r.ticket)
        .collect();
    assert_eq!(failed, failing);

    let left = desk.coordinator.get_open_positions(Some(1), None).await.unwrap();
    assert_eq!(left[0].positions.len(), 2);
}

#[tokio::test]
async fn bulk_close_filters_by_symbol() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();
    desk.coordinator.open_position(1, buy_eurusd()).await;
    desk.coordinator
        .open_position(1, OpenPositionRequest::market("XAUUSD", Side::Sell, dec!(0.1)))
        .await;

    let report = desk.coordinator.bulk_close(1, Some("XAUUSD")).await.unwrap();
    assert_eq!(report.total, 1);

    let left = desk.coordinator.get_open_positions(Some(1), None).await.unwrap();
    assert_eq!(left[0].positions[0].symbol, "EURUSD");
}

#[tokio::test]
async fn bulk_close_requires_connection() {
    let desk = desk();
    assert!(desk.coordinator.bulk_close(1, None).await.is_err());
}

#[tokio::test]
async fn preview_matches_risk_scenario() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();

    let preview = desk
        .coordinator
        .preview_position(
            1,
            &PreviewRequest {
                symbol: "EURUSD".to_string(),
                side: Side::Buy,
                volume: dec!(0.1),
                entry_price: Some(dec!(1.1000)),
                stop_loss: Some(dec!(1.0980)),
                take_profit: Some(dec!(1.1050)),
            },
        )
        .await
        .unwrap();

    assert_eq!(preview.risk_pips, Some(dec!(20.0)));
    assert_eq!(preview.reward_pips, Some(dec!(50.0)));
    assert_eq!(preview.risk_reward_ratio, Some(dec!(2.5)));
    assert!(preview.margin_sufficient);
}

#[tokio::test]
async fn open_positions_across_sessions_skips_disconnected() {
    let desk = desk();
    desk.registry.connect(1, false).await.unwrap();
    desk.registry.connect(2, false).await.unwrap();
    desk.coordinator.open_position(1, buy_eurusd()).await;
    desk.coordinator.open_position(2, buy_eurusd()).await;
    desk.coordinator.open_position(2, buy_eurusd()).await;
    desk.registry.disconnect(1).await.unwrap();

    let all = desk.coordinator.get_open_positions(None, None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].account_id, 2);
    assert_eq!(all[0].positions.len(), 2);

    assert!(desk.coordinator.get_open_positions(Some(1), None).await.is_err());
}

#[tokio::test]
async fn event_sink_failure_does_not_affect_trades() {
    let desk = desk_with_sink(TradingConfig::default(), Some(Arc::new(FailingSink)));
    desk.registry.connect(1, false).await.unwrap();

    let opened = desk.coordinator.open_position(1, buy_eurusd()).await;
    assert!(opened.success, "{:?}", opened.error);
    assert_eq!(opened.stage, OrderStage::Filled);
    let ticket = opened.ticket.unwrap();

    let modified = desk
        .coordinator
        .modify_position(1, ticket, Some(dec!(1.0950)), Some(dec!(1.1100)))
        .await;
    assert!(modified.success, "{:?}", modified.error);
    assert_eq!(modified.ticket, Some(ticket));

    let closed = desk.coordinator.close_position(1, ticket).await;
    assert!(closed.success, "{:?}", closed.error);
    assert_eq!(closed.ticket, Some(ticket));
    assert_eq!(closed.stage, OrderStage::Filled);
    assert!(closed.profit.is_some());

    let remaining = desk.coordinator.get_open_positions(Some(1), None).await.unwrap();
    assert!(remaining.iter().all(|account| account.positions.is_empty()));
}
