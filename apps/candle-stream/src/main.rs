//! Candle Stream Binary
//!
//! Starts the trade-to-candlestick aggregator.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin candle-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required (unless `DEV_MODE=true`)
//! - `DATABASE_URL`, or `DB_HOST`/`DB_PORT`/`DB_USER`/`DB_PASSWORD`/`DB_NAME`
//!
//! ## Optional
//! - `DEV_MODE`: In-memory storage and sequential subscriber IDs (default: false)
//! - `BINANCE_BASE_ENDPOINT`: Stream host (default: stream.binance.com:9443)
//! - `TRADE_SYMBOLS`: Comma separated symbols (default: btcusdt,ethusdt,bnbusdt)
//! - `CANDLE_INTERVAL_SECS`: Candle interval (default: 60)
//! - `CANDLE_GRPC_PORT`: gRPC server port (default: 50051)
//! - `CANDLE_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `SNOWFLAKE_NODE_NUMBER`: Snowflake node, 0-1023 (default: 1)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_TRACES_SAMPLER_ARG`: Fraction of traces sampled (default: 1.0)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use candle_stream::infrastructure::binance::{BinanceClient, BinanceClientConfig, TungsteniteConnector};
use candle_stream::infrastructure::grpc::proto::candles::v1::candlestick_service_server::CandlestickServiceServer;
use candle_stream::infrastructure::grpc::{CandleStreamServer, CandleStreamServerConfig};
use candle_stream::infrastructure::health::{HealthServer, HealthServerState};
use candle_stream::infrastructure::telemetry;
use candle_stream::{
    CandleAggregator, CandlePublisher, CandleRepository, CommitScheduler, InMemoryCandleRepository,
    PgCandleRepository, SequentialIdGenerator, ServiceConfig, SnowflakeIdGenerator,
    SubscriberIdGenerator, SubscriptionRegistry, consume_feed_events, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        span_export = telemetry_guard.is_exporting(),
        "Starting Candle Stream"
    );

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let repository = build_repository(&config).await?;
    let ids = build_id_generator(&config)?;

    // Aggregation publishes every candle change to the registry
    let registry = Arc::new(SubscriptionRegistry::new());
    let publisher: Arc<dyn CandlePublisher> = Arc::clone(&registry) as Arc<dyn CandlePublisher>;
    let aggregator = Arc::new(CandleAggregator::new(
        config.candles.interval,
        repository,
        publisher,
    ));

    // Tick channel between the feed client and the consumer
    let (tick_tx, tick_rx) = mpsc::channel(config.candles.tick_channel_capacity);

    let client_config = BinanceClientConfig {
        base_endpoint: config.feed.base_endpoint.clone(),
        symbols: config.feed.symbols.clone(),
        reconnect: config.feed.reconnect.clone(),
    };
    let client = Arc::new(BinanceClient::new(
        client_config,
        TungsteniteConnector,
        tick_tx,
        &shutdown_token,
    ));

    let connection = client
        .connect()
        .await
        .context("initial connection to the trade feed failed")?;

    // Spawn tick consumer
    let consumer = tokio::spawn(consume_feed_events(
        tick_rx,
        Arc::clone(&aggregator),
        shutdown_token.child_token(),
    ));

    // Spawn feed read loop
    let feed_client = Arc::clone(&client);
    let feed = tokio::spawn(async move {
        if let Err(e) = feed_client.run(connection).await {
            tracing::error!(error = %e, "Trade feed stopped");
        }
    });

    // Spawn commit scheduler
    let scheduler = tokio::spawn(
        CommitScheduler::new(Arc::clone(&aggregator), shutdown_token.child_token()).run(),
    );

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        client.status(),
        Arc::clone(&registry),
        Arc::clone(&aggregator),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn gRPC server
    let grpc_addr: SocketAddr = format!("0.0.0.0:{}", config.server.grpc_port).parse()?;
    let grpc_server = CandleStreamServer::new(
        CandleStreamServerConfig {
            subscriber_buffer: config.candles.subscriber_buffer,
        },
        Arc::clone(&registry),
        ids,
        &shutdown_token,
    );
    let grpc_service = CandlestickServiceServer::new(grpc_server);
    let grpc_shutdown = shutdown_token.clone();

    let grpc = tokio::spawn(async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        if let Err(e) = Server::builder()
            .add_service(grpc_service)
            .serve_with_shutdown(grpc_addr, grpc_shutdown.cancelled())
            .await
        {
            tracing::error!(error = %e, "gRPC server error");
        }
        tracing::info!("gRPC server stopped");
    });

    tracing::info!("Candle stream ready");

    await_shutdown(shutdown_token).await;

    // End live subscriber streams so the gRPC server can drain
    registry.shutdown();

    let barrier = async {
        let (feed, consumer, scheduler) = tokio::join!(feed, consumer, scheduler);
        if let Ok(applied) = consumer {
            tracing::debug!(applied, "Tick consumer joined");
        }
        if feed.is_err() || scheduler.is_err() {
            tracing::warn!("A pipeline task panicked during shutdown");
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, barrier).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Pipeline tasks did not stop in time; flushing anyway"
        );
    }

    match aggregator.flush_all().await {
        Ok(report) => tracing::info!(persisted = report.persisted, "Open candles flushed"),
        Err(e) => tracing::error!(error = %e, "Final candle flush failed"),
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(grpc, health);
    })
    .await
    .is_err()
    {
        tracing::warn!("Servers did not stop in time");
    }

    tracing::info!("Candle stream stopped");
    drop(telemetry_guard);
    Ok(())
}

/// PostgreSQL when a database is configured, otherwise in-memory storage.
async fn build_repository(config: &ServiceConfig) -> anyhow::Result<Arc<dyn CandleRepository>> {
    let Some(database) = &config.database else {
        tracing::warn!("No database configured; candles are kept in memory only");
        return Ok(Arc::new(InMemoryCandleRepository::new()));
    };

    let repository = PgCandleRepository::connect(database.url(), database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    repository
        .migrate()
        .await
        .context("failed to apply database migrations")?;
    Ok(Arc::new(repository))
}

/// Sequential IDs in dev mode, snowflakes otherwise.
fn build_id_generator(config: &ServiceConfig) -> anyhow::Result<Arc<dyn SubscriberIdGenerator>> {
    if config.dev_mode {
        return Ok(Arc::new(SequentialIdGenerator::new()));
    }
    let generator = SnowflakeIdGenerator::new(config.snowflake_node)
        .context("invalid SNOWFLAKE_NODE_NUMBER")?;
    Ok(Arc::new(generator))
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        dev_mode = config.dev_mode,
        symbols = %config.feed.symbols.join(","),
        interval_ms = config.candles.interval.as_millis(),
        grpc_port = config.server.grpc_port,
        health_port = config.server.health_port,
        database = config.database.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        base_endpoint = %config.feed.base_endpoint,
        max_reconnect_attempts = config.feed.reconnect.max_attempts,
        "Trade feed endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
