//! Feed transport abstraction.
//!
//! The client talks to the exchange through [`FeedConnector`] and
//! [`FeedConnection`] so the read loop and reconnect logic can run against
//! scripted connections in tests. [`TungsteniteConnector`] is the real
//! WebSocket transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::client::BinanceClientError;

/// Transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame.
    Binary(Vec<u8>),
    /// Ping with payload; must be answered with a pong.
    Ping(Vec<u8>),
    /// Pong.
    Pong,
    /// Close frame with optional reason.
    Close(Option<String>),
}

/// One open upstream connection.
#[async_trait]
pub trait FeedConnection: Send {
    /// Next inbound frame. `None` means the stream ended.
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, BinanceClientError>>;

    /// Answer a ping.
    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), BinanceClientError>;

    /// Close the connection from our side.
    async fn close(&mut self) -> Result<(), BinanceClientError>;
}

/// Opens upstream connections.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Connection type produced.
    type Connection: FeedConnection + 'static;

    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Self::Connection, BinanceClientError>;
}

// =============================================================================
// tokio-tungstenite transport
// =============================================================================

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

/// WebSocket connection over `tokio-tungstenite`.
pub struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedConnector for TungsteniteConnector {
    type Connection = TungsteniteConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, BinanceClientError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(TungsteniteConnection { stream })
    }
}

#[async_trait]
impl FeedConnection for TungsteniteConnection {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, BinanceClientError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            let frame = match message {
                Message::Text(text) => FeedFrame::Text(text.as_str().to_owned()),
                Message::Binary(data) => FeedFrame::Binary(data.to_vec()),
                Message::Ping(data) => FeedFrame::Ping(data.to_vec()),
                Message::Pong(_) => FeedFrame::Pong,
                Message::Close(frame) => FeedFrame::Close(frame.map(|f| f.reason.as_str().to_owned())),
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), BinanceClientError> {
        self.stream.send(Message::Pong(payload.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BinanceClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
