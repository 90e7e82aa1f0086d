//! Binance Stream Message Types
//!
//! Serde types for the Binance spot WebSocket streams consumed by the
//! ingestion adapter.
//!
//! Reference: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams>

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::candle::Tick;

/// Stream name suffix for aggregate trades.
pub const AGG_TRADE_STREAM: &str = "aggTrade";

/// Aggregate trade event.
///
/// Example:
/// ```json
/// {
///   "e": "aggTrade",
///   "E": 1672515782136,
///   "s": "BNBBTC",
///   "a": 12345,
///   "p": "0.001",
///   "q": "100",
///   "f": 100,
///   "l": 105,
///   "T": 1672515782136,
///   "m": true,
///   "M": true
/// }
/// ```
///
/// Price and quantity arrive as decimal strings; an empty string reads as
/// zero. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggTradeMessage {
    /// Event type (always "aggTrade").
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (epoch millis).
    #[serde(rename = "E", default)]
    pub event_time: i64,

    /// Symbol, e.g. "BTCUSDT".
    #[serde(rename = "s")]
    pub symbol: String,

    /// Aggregate trade ID.
    #[serde(rename = "a", default)]
    pub agg_trade_id: i64,

    /// Price.
    #[serde(rename = "p", deserialize_with = "decimal_or_zero")]
    pub price: Decimal,

    /// Quantity.
    #[serde(rename = "q", default, deserialize_with = "decimal_or_zero")]
    pub quantity: Decimal,

    /// First trade ID in the aggregate.
    #[serde(rename = "f", default)]
    pub first_trade_id: i64,

    /// Last trade ID in the aggregate.
    #[serde(rename = "l", default)]
    pub last_trade_id: i64,

    /// Trade time (epoch millis).
    #[serde(rename = "T")]
    pub trade_time: i64,

    /// Whether the buyer was the market maker.
    #[serde(rename = "m", default)]
    pub is_buyer_maker: bool,

    /// Ignored by Binance clients.
    #[serde(rename = "M", default)]
    pub ignore: bool,
}

impl AggTradeMessage {
    /// Trade time as a UTC timestamp, if representable.
    #[must_use]
    pub fn trade_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.trade_time)
    }

    /// Convert to a domain tick keyed on trade time.
    #[must_use]
    pub fn to_tick(&self) -> Option<Tick> {
        Some(Tick::new(
            self.symbol.clone(),
            self.price,
            self.trade_timestamp()?,
        ))
    }
}

/// Envelope used by the combined `/stream?streams=` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStreamMessage {
    /// Stream name, e.g. "btcusdt@aggTrade".
    pub stream: String,
    /// Raw event payload.
    pub data: serde_json::Value,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinanceMessage {
    /// Aggregate trade.
    AggTrade(AggTradeMessage),
    /// Command acknowledgement.
    CommandResponse,
    /// Any other event type; carried for logging only.
    Other(String),
}

fn decimal_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    trimmed
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "e": "aggTrade", "E": 1672515782136, "s": "BTCUSDT", "a": 12345,
        "p": "16500.10", "q": "0.25", "f": 100, "l": 105, "T": 1672515782130,
        "m": true, "M": true
    }"#;

    #[test]
    fn deserialize_agg_trade() {
        let msg: AggTradeMessage = serde_json::from_str(SAMPLE).unwrap();

        assert_eq!(msg.event_type, "aggTrade");
        assert_eq!(msg.symbol, "BTCUSDT");
        assert_eq!(msg.price, Decimal::new(1_650_010, 2));
        assert_eq!(msg.quantity, Decimal::new(25, 2));
        assert_eq!(msg.trade_time, 1_672_515_782_130);
        assert!(msg.is_buyer_maker);
    }

    #[test]
    fn tick_uses_trade_time() {
        let msg: AggTradeMessage = serde_json::from_str(SAMPLE).unwrap();
        let tick = msg.to_tick().unwrap();

        assert_eq!(tick.event_time.timestamp_millis(), 1_672_515_782_130);
        assert_eq!(tick.price, Decimal::new(1_650_010, 2));
    }

    #[test]
    fn empty_price_reads_as_zero() {
        let msg: AggTradeMessage =
            serde_json::from_str(r#"{"e":"aggTrade","s":"BTCUSDT","p":"","q":"","T":1}"#).unwrap();
        assert_eq!(msg.price, Decimal::ZERO);
        assert_eq!(msg.quantity, Decimal::ZERO);
    }

    #[test]
    fn non_numeric_price_is_an_error() {
        let result: Result<AggTradeMessage, _> =
            serde_json::from_str(r#"{"e":"aggTrade","s":"BTCUSDT","p":"abc","q":"1","T":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg: AggTradeMessage = serde_json::from_str(
            r#"{"e":"aggTrade","s":"ETHUSDT","p":"1.5","q":"2","T":5,"X":"MARKET","extra":{"a":1}}"#,
        )
        .unwrap();
        assert_eq!(msg.symbol, "ETHUSDT");
    }
}
