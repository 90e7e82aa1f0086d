//! Binance Aggregate Trade Client
//!
//! Maintains one WebSocket connection to Binance's aggregate trade streams
//! for a fixed set of symbols and forwards decoded ticks to the tick
//! channel.
//!
//! # Stream URL
//!
//! `wss://{base}/ws/{sym1}@aggTrade/{sym2}@aggTrade/...` with lower-case
//! symbols, e.g. `wss://stream.binance.com:9443/ws/btcusdt@aggTrade`.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected → Connecting → Streaming ─(drop)→ Reconnecting → Connecting
//!                                                     └─(attempts exhausted)→ Disconnected
//! ```
//!
//! The client only holds a `Sender` for the tick channel and never closes
//! it; the channel belongs to whoever created it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::codec::JsonCodec;
use super::connection::{FeedConnection, FeedConnector, FeedFrame, TungsteniteConnector};
use super::messages::{AGG_TRADE_STREAM, BinanceMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::status::{ConnectionState, FeedStatus};
use crate::application::ports::FeedEvent;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the Binance client.
#[derive(Debug, thiserror::Error)]
pub enum BinanceClientError {
    /// Connection could not be opened.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Maximum reconnection attempts exceeded.
    #[error("gave up after {0} reconnection attempts")]
    MaxReconnectAttemptsExceeded(u32),

    /// Client was closed.
    #[error("client closed")]
    Closed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Binance client.
#[derive(Debug, Clone)]
pub struct BinanceClientConfig {
    /// Host (and port) of the stream endpoint, or a full `ws://`/`wss://` base.
    pub base_endpoint: String,
    /// Symbols to stream.
    pub symbols: Vec<String>,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl BinanceClientConfig {
    /// Create a configuration with default reconnect behaviour.
    #[must_use]
    pub fn new(base_endpoint: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            base_endpoint: base_endpoint.into(),
            symbols,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Full stream URL for all configured symbols.
    #[must_use]
    pub fn stream_url(&self) -> String {
        let base = self.base_endpoint.trim_end_matches('/');
        let base = if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            format!("wss://{base}")
        };
        let path = self
            .symbols
            .iter()
            .map(|s| format!("{}@{AGG_TRADE_STREAM}", s.trim().to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        format!("{base}/ws/{path}")
    }
}

/// Why a streaming session ended.
#[derive(Debug)]
enum SessionEnd {
    /// Local shutdown.
    Shutdown,
    /// Connection dropped; reconnect.
    Dropped(String),
}

// =============================================================================
// Client
// =============================================================================

/// Aggregate trade stream client.
pub struct BinanceClient<C: FeedConnector = TungsteniteConnector> {
    config: BinanceClientConfig,
    connector: C,
    codec: JsonCodec,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    status: Arc<FeedStatus>,
}

impl<C: FeedConnector> BinanceClient<C> {
    /// Create a client. Its lifecycle token is a child of `shutdown`.
    #[must_use]
    pub fn new(
        config: BinanceClientConfig,
        connector: C,
        event_tx: mpsc::Sender<FeedEvent>,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            config,
            connector,
            codec: JsonCodec::new(),
            event_tx,
            cancel: shutdown.child_token(),
            status: Arc::new(FeedStatus::new()),
        }
    }

    /// Shared connection status.
    #[must_use]
    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// Open a connection to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the client was closed or the connection fails.
    pub async fn connect(&self) -> Result<C::Connection, BinanceClientError> {
        if self.cancel.is_cancelled() {
            return Err(BinanceClientError::Closed);
        }

        let url = self.config.stream_url();
        self.status.set_state(ConnectionState::Connecting);
        info!(url = %url, "Connecting to Binance aggregate trade stream");

        match self.connector.connect(&url).await {
            Ok(connection) => {
                self.status.set_state(ConnectionState::Streaming);
                self.emit(FeedEvent::Connected).await;
                info!(symbols = ?self.config.symbols, "Binance stream connected");
                Ok(connection)
            }
            Err(e) => {
                self.status.set_state(ConnectionState::Disconnected);
                self.status.set_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Stream from `connection`, reconnecting on drops, until closed.
    ///
    /// # Errors
    ///
    /// Returns [`BinanceClientError::MaxReconnectAttemptsExceeded`] when the
    /// connection cannot be re-established.
    pub async fn run(&self, connection: C::Connection) -> Result<(), BinanceClientError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut connection = connection;

        loop {
            match self.stream(&mut connection).await {
                SessionEnd::Shutdown => {
                    if let Err(e) = connection.close().await {
                        debug!(error = %e, "Close handshake failed");
                    }
                    self.status.set_state(ConnectionState::Disconnected);
                    info!("Binance client stopped");
                    return Ok(());
                }
                SessionEnd::Dropped(reason) => {
                    warn!(reason = %reason, "Binance connection dropped");
                    self.status.set_error(reason);
                    self.emit(FeedEvent::Disconnected).await;
                }
            }

            // Release the dead socket before dialing again.
            drop(connection);
            connection = match self.reconnect(&mut policy).await? {
                Some(connection) => connection,
                None => {
                    self.status.set_state(ConnectionState::Disconnected);
                    info!("Binance client stopped during reconnect");
                    return Ok(());
                }
            };
        }
    }

    /// Stop the client. Safe to call repeatedly or before connecting.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`Self::close`] (or process shutdown) has been requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Retry until connected. `Ok(None)` means the client was closed.
    async fn reconnect(
        &self,
        policy: &mut ReconnectPolicy,
    ) -> Result<Option<C::Connection>, BinanceClientError> {
        loop {
            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                self.status.set_state(ConnectionState::Disconnected);
                let err = BinanceClientError::MaxReconnectAttemptsExceeded(attempts);
                self.emit(FeedEvent::Error(err.to_string())).await;
                return Err(err);
            };
            let attempt = policy.attempt_count();

            self.status.set_state(ConnectionState::Reconnecting);
            self.status.set_reconnect_attempt(attempt);
            metrics::record_reconnect();
            info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to Binance stream");
            self.emit(FeedEvent::Reconnecting { attempt, delay }).await;

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(delay) => {}
            }

            match self.connect().await {
                Ok(connection) => {
                    policy.reset();
                    return Ok(Some(connection));
                }
                Err(BinanceClientError::Closed) => return Ok(None),
                Err(e) => {
                    self.status.set_state(ConnectionState::Reconnecting);
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                }
            }
        }
    }

    /// Read frames until shutdown or the connection drops.
    async fn stream(&self, connection: &mut C::Connection) -> SessionEnd {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return SessionEnd::Shutdown,
                frame = connection.next_frame() => frame,
            };

            match frame {
                Some(Ok(FeedFrame::Text(text))) => {
                    self.status.increment_frames();
                    if !self.handle_text(&text).await {
                        return SessionEnd::Shutdown;
                    }
                }
                Some(Ok(FeedFrame::Ping(payload))) => {
                    trace!("Ping received; replying");
                    if let Err(e) = connection.send_pong(payload).await {
                        return SessionEnd::Dropped(format!("pong failed: {e}"));
                    }
                }
                Some(Ok(FeedFrame::Close(reason))) => {
                    return SessionEnd::Dropped(format!(
                        "server closed connection: {}",
                        reason.unwrap_or_default()
                    ));
                }
                Some(Ok(FeedFrame::Pong | FeedFrame::Binary(_))) => {
                    trace!("Ignoring non-text frame");
                }
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("stream ended".to_string()),
            }
        }
    }

    /// Decode and forward one text frame. Returns `false` on shutdown.
    async fn handle_text(&self, text: &str) -> bool {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                self.status.increment_skipped();
                metrics::record_frame_skipped();
                warn!(error = %e, "Skipping undecodable frame");
                return true;
            }
        };

        match message {
            BinanceMessage::AggTrade(trade) => {
                let Some(tick) = trade.to_tick() else {
                    self.status.increment_skipped();
                    metrics::record_frame_skipped();
                    warn!(trade_time = trade.trade_time, "Skipping trade with invalid time");
                    return true;
                };
                let delivered = self.emit(FeedEvent::Trade(tick)).await;
                if delivered {
                    self.status.increment_ticks();
                }
                delivered
            }
            BinanceMessage::CommandResponse => {
                debug!("Command acknowledged");
                true
            }
            BinanceMessage::Other(event) => {
                debug!(event = %event, "Ignoring unexpected event type");
                true
            }
        }
    }

    /// Send an event, giving up on shutdown. Returns `false` if the event
    /// was not delivered.
    async fn emit(&self, event: FeedEvent) -> bool {
        tokio::select! {
            biased;
            result = self.event_tx.send(event) => {
                if result.is_err() {
                    debug!("Feed event receiver dropped");
                    return false;
                }
                true
            }
            () = self.cancel.cancelled() => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
