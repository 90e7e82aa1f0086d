//! gRPC Candlestick Service Implementation
//!
//! Implements `candles.v1.CandlestickService` on top of the
//! [`SubscriptionRegistry`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use super::proto::candles::v1::{
    Candlestick, SubscribeRequest, SubscribeResponse, UnsubscribeRequest, UnsubscribeResponse,
    candlestick_service_server::CandlestickService,
};
use crate::application::ports::{CandleSink, SinkError, SubscriberIdGenerator};
use crate::application::services::{SubscribeOutcome, SubscriptionRegistry, UnsubscribeOutcome};
use crate::domain::candle::Candle;
use crate::domain::subscription::{SubscriberId, normalize_symbols};

// =============================================================================
// Type Aliases
// =============================================================================

type RpcResult<T> = Result<Response<T>, Status>;
type CandleUpdateStream = ReceiverStream<Result<SubscribeResponse, Status>>;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the gRPC candle service.
#[derive(Debug, Clone)]
pub struct CandleStreamServerConfig {
    /// Updates buffered per subscriber before new ones are dropped.
    pub subscriber_buffer: usize,
}

impl Default for CandleStreamServerConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 100,
        }
    }
}

// =============================================================================
// Subscriber Sink
// =============================================================================

/// Registry sink writing into one subscriber's response channel.
struct GrpcCandleSink {
    subscriber_id: SubscriberId,
    tx: mpsc::Sender<Result<SubscribeResponse, Status>>,
}

impl CandleSink for GrpcCandleSink {
    fn try_send(&self, candle: &Candle) -> Result<(), SinkError> {
        let response = SubscribeResponse {
            subscriber_id: self.subscriber_id,
            candlestick: Some(candle_to_proto(candle)),
        };
        self.tx.try_send(Ok(response)).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

/// gRPC front end for candle subscriptions.
pub struct CandleStreamServer {
    config: CandleStreamServerConfig,
    registry: Arc<SubscriptionRegistry>,
    ids: Arc<dyn SubscriberIdGenerator>,
    shutdown: CancellationToken,
}

impl CandleStreamServer {
    /// Create the service. Subscriber lifecycles are children of `shutdown`.
    #[must_use]
    pub fn new(
        config: CandleStreamServerConfig,
        registry: Arc<SubscriptionRegistry>,
        ids: Arc<dyn SubscriberIdGenerator>,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            ids,
            shutdown: shutdown.child_token(),
        }
    }

    fn assign_id(&self, requested: SubscriberId) -> Result<SubscriberId, Status> {
        if requested != 0 {
            return Ok(requested);
        }
        self.ids.next_id().map_err(|e| {
            warn!(error = %e, "Subscriber ID generation failed");
            Status::internal(format!("failed to generate subscriber id: {e}"))
        })
    }
}

#[tonic::async_trait]
impl CandlestickService for CandleStreamServer {
    type SubscribeStream = CandleUpdateStream;

    async fn subscribe(&self, request: Request<SubscribeRequest>) -> RpcResult<Self::SubscribeStream> {
        let req = request.into_inner();
        let symbols = normalize_symbols(&req.symbols)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let subscriber_id = self.assign_id(req.subscriber_id)?;

        // One extra slot so the acknowledgement never competes with updates.
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer.max(1) + 1);
        tx.try_send(Ok(SubscribeResponse {
            subscriber_id,
            candlestick: None,
        }))
        .map_err(|_| Status::internal("failed to acknowledge subscription"))?;

        let sink: Arc<dyn CandleSink> = Arc::new(GrpcCandleSink {
            subscriber_id,
            tx: tx.clone(),
        });
        let cancel = self.shutdown.child_token();
        let outcome = self
            .registry
            .subscribe(subscriber_id, &symbols, Arc::clone(&sink), cancel.clone())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        match outcome {
            SubscribeOutcome::Extended { added } => {
                debug!(subscriber_id, ?added, "Existing subscriber extended");
            }
            SubscribeOutcome::Created { symbols } => {
                info!(subscriber_id, ?symbols, "Subscription stream opened");
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    tokio::select! {
                        () = tx.closed() => debug!(subscriber_id, "Subscriber disconnected"),
                        () = cancel.cancelled() => debug!(subscriber_id, "Subscription cancelled"),
                    }
                    registry.release(subscriber_id, &sink);
                });
            }
        }

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn unsubscribe(&self, request: Request<UnsubscribeRequest>) -> RpcResult<UnsubscribeResponse> {
        let req = request.into_inner();
        if req.subscriber_id == 0 {
            return Err(Status::invalid_argument(
                "a valid subscriber id must be provided",
            ));
        }
        let id = req.subscriber_id;

        let response = match self.registry.unsubscribe(id, &req.symbols) {
            UnsubscribeOutcome::Removed { symbols } => UnsubscribeResponse {
                message: format!("subscriber {id} unsubscribed from all symbols"),
                removed_symbols: symbols.into_iter().collect(),
                subscriber_removed: true,
            },
            UnsubscribeOutcome::SymbolsRemoved { removed, .. } => {
                let removed: Vec<String> = removed.into_iter().collect();
                UnsubscribeResponse {
                    message: format!("subscriber {id} unsubscribed from {}", removed.join(", ")),
                    removed_symbols: removed,
                    subscriber_removed: false,
                }
            }
            UnsubscribeOutcome::NotFound => UnsubscribeResponse {
                message: format!("subscriber {id} not found; nothing to remove"),
                removed_symbols: Vec::new(),
                subscriber_removed: false,
            },
        };

        Ok(Response::new(response))
    }
}

// =============================================================================
// Conversion Helpers
// =============================================================================

fn candle_to_proto(candle: &Candle) -> Candlestick {
    Candlestick {
        symbol: candle.symbol.clone(),
        open: decimal_to_f64(candle.open),
        high: decimal_to_f64(candle.high),
        low: decimal_to_f64(candle.low),
        close: decimal_to_f64(candle.close),
        bucket_start: Some(datetime_to_timestamp(candle.bucket_start)),
    }
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(i32::MAX),
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

// =============================================================================
// Tests
// =============================================================================
