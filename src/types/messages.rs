//! WebSocket message types.
//!
//! Raw events arrive wrapped in the combined-stream envelope
//! `{"stream": "...", "data": {...}}`. They are validated exactly once, at
//! ingress, and converted into [`DiffMessage`] / [`TradeMessage`]; everything
//! downstream works on the typed form only. The typed form serializes back to
//! the exchange's event layout, so the update and trade logs hold the events
//! as they were received.

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use super::{Price, Quantity, TimestampMs, UpdateId};
use crate::error::Error;

/// Combined-stream wrapper around every event
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    /// Stream name, e.g. `btcusdt@depth@100ms`
    pub stream: String,
    /// Event payload
    pub data: StreamEvent,
}

/// Event received on a market data stream
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum StreamEvent {
    /// Incremental order book update
    #[serde(rename = "depthUpdate")]
    DepthUpdate(DepthUpdateEvent),
    /// Aggregated trade
    #[serde(rename = "aggTrade")]
    AggTrade(AggTradeEvent),
}

/// Raw `depthUpdate` event
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdateEvent {
    /// Event time (Unix ms)
    #[serde(rename = "E")]
    pub event_time: TimestampMs,
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// First update id in this event
    #[serde(rename = "U")]
    pub first_update_id: UpdateId,
    /// Final update id in this event
    #[serde(rename = "u")]
    pub final_update_id: UpdateId,
    /// Bid levels to update: [[price, quantity], ...]
    #[serde(rename = "b")]
    pub bids: Vec<(Price, Quantity)>,
    /// Ask levels to update: [[price, quantity], ...]
    #[serde(rename = "a")]
    pub asks: Vec<(Price, Quantity)>,
}

/// Raw `aggTrade` event
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeEvent {
    /// Event time (Unix ms)
    #[serde(rename = "E")]
    pub event_time: TimestampMs,
    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// Aggregate trade id
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    /// Price
    #[serde(rename = "p")]
    pub price: Price,
    /// Quantity
    #[serde(rename = "q")]
    pub quantity: Quantity,
    /// First trade id
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    /// Last trade id
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    /// Trade time (Unix ms)
    #[serde(rename = "T")]
    pub trade_time: TimestampMs,
    /// Was the buyer the maker?
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
    /// Was the trade the best price match?
    #[serde(rename = "M", default)]
    pub is_best_match: bool,
}

/// Validated depth diff for one symbol
///
/// A size of zero in `bid_updates` / `ask_updates` removes the level.
/// Serializes as a `depthUpdate` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "e", rename = "depthUpdate")]
pub struct DiffMessage {
    /// Event time (Unix ms)
    #[serde(rename = "E")]
    pub event_time: TimestampMs,
    /// Upper-case symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// First update id covered by this diff
    #[serde(rename = "U")]
    pub first_update_id: UpdateId,
    /// Final update id covered by this diff
    #[serde(rename = "u")]
    pub final_update_id: UpdateId,
    /// Bid changes in exchange order
    #[serde(rename = "b")]
    pub bid_updates: Vec<(Price, Quantity)>,
    /// Ask changes in exchange order
    #[serde(rename = "a")]
    pub ask_updates: Vec<(Price, Quantity)>,
}

impl DiffMessage {
    /// Create an empty diff covering `first..=last`
    #[must_use]
    pub fn new(symbol: impl Into<String>, first_update_id: UpdateId, final_update_id: UpdateId) -> Self {
        Self {
            event_time: 0,
            symbol: symbol.into(),
            first_update_id,
            final_update_id,
            bid_updates: Vec::new(),
            ask_updates: Vec::new(),
        }
    }

    /// Add a bid change
    #[must_use]
    pub fn with_bid(mut self, price: Price, size: Quantity) -> Self {
        self.bid_updates.push((price, size));
        self
    }

    /// Add an ask change
    #[must_use]
    pub fn with_ask(mut self, price: Price, size: Quantity) -> Self {
        self.ask_updates.push((price, size));
        self
    }

    /// Set the event time
    #[must_use]
    pub fn with_event_time(mut self, event_time: TimestampMs) -> Self {
        self.event_time = event_time;
        self
    }
}

impl TryFrom<DepthUpdateEvent> for DiffMessage {
    type Error = Error;

    fn try_from(event: DepthUpdateEvent) -> Result<Self, Error> {
        let symbol = normalize_symbol(&event.symbol)?;
        if event.first_update_id > event.final_update_id {
            return Err(Error::InvalidMessage(format!(
                "{symbol}: first update id {} after final update id {}",
                event.first_update_id, event.final_update_id
            )));
        }
        for (price, size) in event.bids.iter().chain(event.asks.iter()) {
            validate_level(&symbol, *price, *size)?;
        }
        Ok(Self {
            event_time: event.event_time,
            symbol,
            first_update_id: event.first_update_id,
            final_update_id: event.final_update_id,
            bid_updates: event.bids,
            ask_updates: event.asks,
        })
    }
}

/// Validated aggregated trade
///
/// Serializes as an `aggTrade` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "e", rename = "aggTrade")]
pub struct TradeMessage {
    /// Event time (Unix ms)
    #[serde(rename = "E")]
    pub event_time: TimestampMs,
    /// Upper-case symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// Aggregate trade id
    #[serde(rename = "a")]
    pub trade_id: u64,
    /// Trade price
    #[serde(rename = "p")]
    pub price: Price,
    /// Trade quantity
    #[serde(rename = "q")]
    pub qty: Quantity,
    /// First trade id in the aggregate
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    /// Last trade id in the aggregate
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    /// Trade time (Unix ms)
    #[serde(rename = "T")]
    pub trade_time: TimestampMs,
    /// Was the buyer the maker?
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
    /// Was the trade the best price match?
    #[serde(rename = "M", default)]
    pub is_best_match: bool,
}

impl TradeMessage {
    /// Create a trade for one aggregate id, with its first and last trade ids
    /// equal to it
    #[must_use]
    pub fn new(symbol: impl Into<String>, trade_id: u64, price: Price, qty: Quantity) -> Self {
        Self {
            event_time: 0,
            symbol: symbol.into(),
            trade_id,
            price,
            qty,
            first_trade_id: trade_id,
            last_trade_id: trade_id,
            trade_time: 0,
            buyer_is_maker: false,
            is_best_match: true,
        }
    }

    /// Set the trade and event times
    #[must_use]
    pub fn at(mut self, trade_time: TimestampMs) -> Self {
        self.trade_time = trade_time;
        self.event_time = trade_time;
        self
    }

    /// Set the maker side
    #[must_use]
    pub fn with_buyer_is_maker(mut self, buyer_is_maker: bool) -> Self {
        self.buyer_is_maker = buyer_is_maker;
        self
    }
}

impl TryFrom<AggTradeEvent> for TradeMessage {
    type Error = Error;

    fn try_from(event: AggTradeEvent) -> Result<Self, Error> {
        let symbol = normalize_symbol(&event.symbol)?;
        if event.price.is_sign_negative() || event.price.is_zero() {
            return Err(Error::InvalidMessage(format!(
                "{symbol}: non-positive trade price {}",
                event.price
            )));
        }
        if event.quantity.is_sign_negative() {
            return Err(Error::InvalidMessage(format!(
                "{symbol}: negative trade quantity {}",
                event.quantity
            )));
        }
        Ok(Self {
            event_time: event.event_time,
            symbol,
            trade_id: event.agg_trade_id,
            price: event.price,
            qty: event.quantity,
            first_trade_id: event.first_trade_id,
            last_trade_id: event.last_trade_id,
            trade_time: event.trade_time,
            buyer_is_maker: event.buyer_is_maker,
            is_best_match: event.is_best_match,
        })
    }
}

fn normalize_symbol(symbol: &str) -> Result<String, Error> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(Error::InvalidMessage("empty symbol".to_string()));
    }
    Ok(symbol.to_ascii_uppercase())
}

fn validate_level(symbol: &str, price: Price, size: Quantity) -> Result<(), Error> {
    if price.is_sign_negative() || price.is_zero() {
        return Err(Error::InvalidMessage(format!(
            "{symbol}: non-positive level price {price}"
        )));
    }
    if size.is_sign_negative() {
        return Err(Error::InvalidMessage(format!(
            "{symbol}: negative level size {size} at {price}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_depth_update_deserialization() {
        let json = r#"{
            "stream": "bnbbtc@depth@100ms",
            "data": {
                "e": "depthUpdate",
                "E": 1672515782136,
                "s": "BNBBTC",
                "U": 157,
                "u": 160,
                "b": [["0.0024", "10"]],
                "a": [["0.0026", "100"], ["0.0027", "0.00000000"]]
            }
        }"#;

        let envelope: StreamEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.stream, "bnbbtc@depth@100ms");
        match envelope.data {
            StreamEvent::DepthUpdate(event) => {
                let diff = DiffMessage::try_from(event).unwrap();
                assert_eq!(diff.symbol, "BNBBTC");
                assert_eq!(diff.first_update_id, 157);
                assert_eq!(diff.final_update_id, 160);
                assert_eq!(diff.bid_updates, vec![(dec!(0.0024), dec!(10))]);
                assert_eq!(diff.ask_updates.len(), 2);
                assert!(diff.ask_updates[1].1.is_zero());
            }
            _ => panic!("Expected DepthUpdate"),
        }
    }

    #[test]
    fn test_agg_trade_deserialization() {
        let json = r#"{
            "stream": "bnbbtc@aggTrade",
            "data": {
                "e": "aggTrade",
                "E": 1672515782136,
                "s": "BNBBTC",
                "a": 12345,
                "p": "0.001",
                "q": "100",
                "f": 100,
                "l": 105,
                "T": 1672515782136,
                "m": true,
                "M": true
            }
        }"#;

        let envelope: StreamEnvelope = serde_json::from_str(json).unwrap();
        match envelope.data {
            StreamEvent::AggTrade(event) => {
                let trade = TradeMessage::try_from(event).unwrap();
                assert_eq!(trade.trade_id, 12345);
                assert_eq!(trade.price, dec!(0.001));
                assert_eq!(trade.qty, dec!(100));
                assert_eq!((trade.first_trade_id, trade.last_trade_id), (100, 105));
                assert_eq!(trade.event_time, 1672515782136);
                assert!(trade.buyer_is_maker);
                assert!(trade.is_best_match);
            }
            _ => panic!("Expected AggTrade"),
        }
    }

    #[test]
    fn test_rejects_inverted_update_ids() {
        let event = DepthUpdateEvent {
            event_time: 0,
            symbol: "ethbtc".to_string(),
            first_update_id: 10,
            final_update_id: 9,
            bids: vec![],
            asks: vec![],
        };
        assert!(matches!(
            DiffMessage::try_from(event),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_rejects_negative_size() {
        let event = DepthUpdateEvent {
            event_time: 0,
            symbol: "ETHBTC".to_string(),
            first_update_id: 1,
            final_update_id: 1,
            bids: vec![(dec!(0.05), dec!(-1))],
            asks: vec![],
        };
        assert!(DiffMessage::try_from(event).is_err());
    }

    #[test]
    fn test_symbol_is_normalized() {
        let event = DepthUpdateEvent {
            event_time: 0,
            symbol: "ethbtc".to_string(),
            first_update_id: 1,
            final_update_id: 2,
            bids: vec![],
            asks: vec![],
        };
        assert_eq!(DiffMessage::try_from(event).unwrap().symbol, "ETHBTC");
    }

    #[test]
    fn test_diff_serializes_as_depth_update_event() {
        let diff = DiffMessage::new("ETHBTC", 1, 2)
            .with_bid(dec!(0.05), dec!(3))
            .with_event_time(1672515782136);
        let value = serde_json::to_value(&diff).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "e": "depthUpdate",
                "E": 1672515782136u64,
                "s": "ETHBTC",
                "U": 1,
                "u": 2,
                "b": [["0.05", "3"]],
                "a": []
            })
        );
    }

    #[test]
    fn test_trade_keeps_every_agg_trade_field() {
        let json = r#"{"e":"aggTrade","E":1672515782137,"s":"BNBBTC","a":7,"p":"0.001",
            "q":"2","f":10,"l":12,"T":1672515782136,"m":false,"M":true}"#;
        let StreamEvent::AggTrade(event) = serde_json::from_str::<StreamEvent>(json).unwrap() else {
            panic!("Expected AggTrade");
        };
        let trade = TradeMessage::try_from(event).unwrap();

        let original: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_value(&trade).unwrap(), original);
    }
}
