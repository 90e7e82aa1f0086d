//! Binance Feed Integration Tests
//!
//! Serves aggregate trade frames from a local WebSocket server and checks
//! what the client puts on the tick channel.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use candle_stream::{
    BinanceClient, BinanceClientConfig, CandleAggregator, CandleInterval, ConnectionState,
    FeedEvent, InMemoryCandleRepository, ReconnectConfig, TungsteniteConnector,
    application::ports::NoopPublisher, consume_feed_events,
};

const WAIT: Duration = Duration::from_secs(5);

fn agg_trade(symbol: &str, price: &str, trade_time: i64) -> String {
    serde_json::json!({
        "e": "aggTrade",
        "E": trade_time + 5,
        "s": symbol,
        "a": 26_129,
        "p": price,
        "q": "0.5",
        "f": 27_781,
        "l": 27_781,
        "T": trade_time,
        "m": true,
        "M": true
    })
    .to_string()
}

/// Accept `connections` WebSocket clients in turn, send each its frames,
/// then drop the socket.
async fn spawn_feed(connections: Vec<Vec<String>>) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        for frames in connections {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            for frame in frames {
                ws.send(Message::text(frame)).await.unwrap();
            }
            ws.close(None).await.ok();
            // Drain until the peer acknowledges the close.
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    (format!("ws://{addr}"), handle)
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 3,
        ..ReconnectConfig::default()
    }
}

async fn recv(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for feed event")
        .expect("feed channel closed")
}

#[tokio::test]
async fn trades_arrive_as_ticks_and_reconnect_after_close() {
    let t0 = 1_700_000_000_000;
    let (base, server) = spawn_feed(vec![
        vec![
            agg_trade("BTCUSDT", "100.50", t0),
            "not json".to_string(),
            agg_trade("BTCUSDT", "101.00", t0 + 1),
        ],
        vec![agg_trade("BTCUSDT", "99.00", t0 + 2)],
    ])
    .await;

    let shutdown = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let mut config = BinanceClientConfig::new(base, vec!["btcusdt".to_string()]);
    config.reconnect = fast_reconnect();
    let client = Arc::new(BinanceClient::new(config, TungsteniteConnector, tx, &shutdown));

    let connection = client.connect().await.unwrap();
    let runner = Arc::clone(&client);
    let run = tokio::spawn(async move { runner.run(connection).await });

    assert_eq!(recv(&mut rx).await, FeedEvent::Connected);

    let FeedEvent::Trade(first) = recv(&mut rx).await else {
        panic!("expected a trade");
    };
    assert_eq!(first.symbol, "BTCUSDT");
    assert_eq!(first.price.to_string(), "100.50");
    assert_eq!(first.event_time.timestamp_millis(), t0);

    let FeedEvent::Trade(second) = recv(&mut rx).await else {
        panic!("expected a trade");
    };
    assert_eq!(second.price.to_string(), "101.00");

    assert_eq!(recv(&mut rx).await, FeedEvent::Disconnected);
    assert!(matches!(
        recv(&mut rx).await,
        FeedEvent::Reconnecting { attempt: 1, .. }
    ));
    assert_eq!(recv(&mut rx).await, FeedEvent::Connected);

    let FeedEvent::Trade(third) = recv(&mut rx).await else {
        panic!("expected a trade");
    };
    assert_eq!(third.price.to_string(), "99.00");

    assert_eq!(client.status().snapshot().frames_skipped, 1);

    shutdown.cancel();
    let _ = timeout(WAIT, run).await;
    server.abort();
}

#[tokio::test]
async fn gives_up_when_the_feed_stays_down() {
    let (base, server) = spawn_feed(vec![vec![]]).await;

    let shutdown = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let mut config = BinanceClientConfig::new(base, vec!["btcusdt".to_string()]);
    config.reconnect = fast_reconnect();
    let client = BinanceClient::new(config, TungsteniteConnector, tx, &shutdown);

    let connection = client.connect().await.unwrap();

    let result = timeout(WAIT, client.run(connection)).await.unwrap();

    assert!(matches!(
        result,
        Err(candle_stream::BinanceClientError::MaxReconnectAttemptsExceeded(3))
    ));
    server.await.unwrap();
    assert_eq!(client.status().state(), ConnectionState::Disconnected);

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    assert!(matches!(last, Some(FeedEvent::Error(_))));
}

#[tokio::test]
async fn ticks_flow_into_candles() {
    let t0 = 1_700_000_040_000;
    let (base, server) = spawn_feed(vec![vec![
        agg_trade("BTCUSDT", "100", t0),
        agg_trade("BTCUSDT", "110", t0 + 1_000),
        agg_trade("BTCUSDT", "95", t0 + 2_000),
        agg_trade("BTCUSDT", "105", t0 + 3_000),
    ]])
    .await;

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);
    let client = Arc::new(BinanceClient::new(
        BinanceClientConfig::new(base, vec!["btcusdt".to_string()]),
        TungsteniteConnector,
        tx,
        &shutdown,
    ));
    let repository = Arc::new(InMemoryCandleRepository::new());
    let aggregator = Arc::new(CandleAggregator::new(
        CandleInterval::ONE_MINUTE,
        Arc::clone(&repository) as Arc<dyn candle_stream::CandleRepository>,
        Arc::new(NoopPublisher),
    ));

    let connection = client.connect().await.unwrap();
    let runner = Arc::clone(&client);
    tokio::spawn(async move { runner.run(connection).await });
    let consumer = tokio::spawn(consume_feed_events(
        rx,
        Arc::clone(&aggregator),
        shutdown.child_token(),
    ));

    timeout(WAIT, async {
        while client.status().snapshot().ticks_forwarded < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("ticks were not forwarded");

    shutdown.cancel();
    assert_eq!(timeout(WAIT, consumer).await.unwrap().unwrap(), 4);

    let report = aggregator.flush_all().await.unwrap();
    assert_eq!(report.persisted, 1);

    let bucket = CandleInterval::ONE_MINUTE
        .bucket_start(chrono::DateTime::from_timestamp_millis(t0).unwrap());
    let candle = repository.get("BTCUSDT", bucket).unwrap();
    assert_eq!(candle.open.to_string(), "100");
    assert_eq!(candle.high.to_string(), "110");
    assert_eq!(candle.low.to_string(), "95");
    assert_eq!(candle.close.to_string(), "105");

    server.abort();
}
