use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// One `[price, quantity]` pair as sent by the exchange (decimal strings).
pub type PriceLevel = Vec<String>;

/// Diff depth event as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookData {
    #[serde(rename = "e")]
    pub event_type: String,

    #[serde(rename = "E")]
    pub event_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "U")]
    pub first_update_id: i64,

    #[serde(rename = "u")]
    pub final_update_id: i64,

    #[serde(rename = "b", default)]
    pub bid_updates: Vec<PriceLevel>,

    #[serde(rename = "a", default)]
    pub ask_updates: Vec<PriceLevel>,
}

impl OrderBookData {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Price of the first bid delta, if the event carries any bid update.
    pub fn first_bid_price(&self) -> Option<&str> {
        self.bid_updates
            .first()
            .map(|level| level.first().map(String::as_str).unwrap_or(""))
    }
}

/// A decoded update together with the time it was received.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookUpdate {
    pub data: OrderBookData,
    pub timestamp: DateTime<Utc>,
}

/// An update as read back from the Update Store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpdate {
    /// Insertion sequence; breaks ties between equal timestamps.
    pub seq: i64,
    pub update: OrderBookUpdate,
    /// Assigned by the store at insert time; drives expiry.
    pub created_at: DateTime<Utc>,
}
