//! End-to-end pipeline tests: bus -> aggregator + hub over an
//! in-memory store, exercising the same wiring the binary sets up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use tokio::sync::watch;

use indexer_core::{Candle, CandleInterval, Exchange, ServerMessage, Trade, TradeSide};
use indexer_services::{run_backfill, CandleAggregator, HubConfig, TradeBus, TradeHub};
use indexer_storage::{InsertOutcome, StorageGateway};

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Persist then publish, the way the ingesters do
fn ingest(storage: &StorageGateway, bus: &TradeBus, mut trade: Trade) -> bool {
    match storage.insert_trade(&trade).unwrap() {
        InsertOutcome::Inserted(id) => {
            trade.id = Some(id);
            bus.publish(&trade);
            true
        }
        InsertOutcome::Duplicate { .. } => false,
    }
}

fn all_candles(storage: &StorageGateway, exchange: Exchange, market: &str) -> Vec<Candle> {
    CandleInterval::ALL
        .iter()
        .flat_map(|interval| {
            storage
                .query_candles(exchange, market, *interval, None, None, 5000)
                .unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_live_pipeline_builds_candles_and_fans_out() {
    let storage = Arc::new(StorageGateway::open_in_memory().unwrap());
    let bus = Arc::new(TradeBus::new());
    let hub = Arc::new(TradeHub::new(HubConfig::default()));
    let aggregator = Arc::new(CandleAggregator::new(Arc::clone(&storage)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let aggregator_task = tokio::spawn(Arc::clone(&aggregator).run(
        bus.subscribe("aggregator", 1024),
        shutdown_rx.clone(),
    ));
    let hub_task = tokio::spawn(
        Arc::clone(&hub).dispatch(bus.subscribe("hub", 1024), shutdown_rx.clone()),
    );

    // one client subscribed to the traded market, one to another
    let (conn_x, outbox_x) = hub.connect();
    let (conn_y, outbox_y) = hub.connect();
    hub.handle_frame(
        conn_x,
        r#"{"action":"subscribe","exchange":"kalshi","marketId":"M"}"#,
    );
    hub.handle_frame(
        conn_y,
        r#"{"action":"subscribe","exchange":"polymarket","marketId":"OTHER"}"#,
    );

    let fills = [
        (dec!(0.50), dec!(1), "2024-01-01T12:34:56.100Z"),
        (dec!(0.60), dec!(2), "2024-01-01T12:34:56.500Z"),
        (dec!(0.45), dec!(3), "2024-01-01T12:34:57.000Z"),
        (dec!(0.55), dec!(4), "2024-01-01T12:34:57.900Z"),
    ];
    for (i, (price, quantity, when)) in fills.iter().enumerate() {
        let trade = Trade::kalshi(
            "M",
            &format!("t{}", i),
            *price,
            *quantity,
            TradeSide::Buy,
            ts(when),
        );
        assert!(ingest(&storage, &bus, trade));
    }

    // duplicate submission: absorbed, not republished
    let duplicate = Trade::kalshi(
        "M",
        "t0",
        dec!(0.50),
        dec!(1),
        TradeSide::Buy,
        ts("2024-01-01T12:34:56.100Z"),
    );
    assert!(!ingest(&storage, &bus, duplicate));

    shutdown_tx.send(true).unwrap();
    bus.close();
    tokio::time::timeout(Duration::from_secs(5), aggregator_task)
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), hub_task)
        .await
        .unwrap()
        .unwrap();

    // the minute candle reflects all four trades exactly once
    let candle = storage
        .get_candle(
            Exchange::Kalshi,
            "M",
            CandleInterval::OneMinute,
            ts("2024-01-01T12:34:00Z"),
        )
        .unwrap()
        .unwrap();
    assert_eq!(candle.open, dec!(0.50));
    assert_eq!(candle.high, dec!(0.60));
    assert_eq!(candle.low, dec!(0.45));
    assert_eq!(candle.close, dec!(0.55));
    assert_eq!(candle.volume, dec!(10));

    // two second-buckets, one minute, one hour
    assert_eq!(all_candles(&storage, Exchange::Kalshi, "M").len(), 4);

    // fan-out reached the subscribed client only
    let mut x_trades = 0;
    while let Some(frame) = outbox_x.try_recv() {
        if matches!(frame, ServerMessage::Trade { .. }) {
            x_trades += 1;
        }
    }
    assert_eq!(x_trades, 4);

    while let Some(frame) = outbox_y.try_recv() {
        assert!(!matches!(frame, ServerMessage::Trade { .. }));
    }

    assert_eq!(aggregator.processed(), 4);
    assert_eq!(aggregator.upsert_errors(), 0);
}

#[tokio::test]
async fn test_restart_backfill_reproduces_live_candles() {
    let storage = Arc::new(StorageGateway::open_in_memory().unwrap());
    let bus = Arc::new(TradeBus::new());
    let aggregator = Arc::new(CandleAggregator::new(Arc::clone(&storage)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let aggregator_task = tokio::spawn(
        Arc::clone(&aggregator).run(bus.subscribe("aggregator", 1024), shutdown_rx),
    );

    // a hundred trades spread over a few minutes, two markets
    let base = ts("2024-01-01T12:00:00Z");
    for i in 0..100i64 {
        let market = if i % 3 == 0 { "A" } else { "B" };
        let trade = Trade::kalshi(
            market,
            &format!("t{}", i),
            dec!(0.40) + rust_decimal::Decimal::new(i % 40, 2),
            dec!(1) + rust_decimal::Decimal::new(i % 5, 0),
            if i % 2 == 0 {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            },
            base + chrono::Duration::milliseconds(i * 3700),
        );
        ingest(&storage, &bus, trade);
    }

    shutdown_tx.send(true).unwrap();
    bus.close();
    tokio::time::timeout(Duration::from_secs(5), aggregator_task)
        .await
        .unwrap()
        .unwrap();

    let live_a = all_candles(&storage, Exchange::Kalshi, "A");
    let live_b = all_candles(&storage, Exchange::Kalshi, "B");
    assert!(!live_a.is_empty());
    assert!(!live_b.is_empty());

    // "restart": rebuild everything from the trades table
    run_backfill(&storage).unwrap();

    assert_eq!(all_candles(&storage, Exchange::Kalshi, "A"), live_a);
    assert_eq!(all_candles(&storage, Exchange::Kalshi, "B"), live_b);
}
