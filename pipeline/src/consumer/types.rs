use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::signal::types::Signal;
use crate::stream::{StreamId, StreamMessage};

/// Normalized record written to the output log for each consumed message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub original_id: StreamId,
    /// JSON object holding every field of the original message plus `id`.
    pub original_data: String,
    pub processed: bool,
    /// The original message's `time` field, verbatim.
    pub processed_at: String,
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("message is missing field {0:?}")]
    MissingField(&'static str),

    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProcessedRecord {
    pub fn from_message(msg: &StreamMessage) -> Result<Self, NormalizeError> {
        let processed_at = msg
            .field("time")
            .ok_or(NormalizeError::MissingField("time"))?
            .to_string();

        let mut data: Map<String, Value> = msg
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        data.insert("id".to_string(), Value::String(msg.id.to_string()));

        Ok(Self {
            original_id: msg.id,
            original_data: serde_json::to_string(&data)?,
            processed: true,
            processed_at,
        })
    }
}

/// What the trader does with a consumed signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
    /// Signal value the trader does not recognise (or none at all).
    Unknown(Option<String>),
}

impl TradeAction {
    pub fn from_message(msg: &StreamMessage) -> Self {
        match msg.field("signal") {
            None => TradeAction::Unknown(None),
            Some(raw) => match Signal::from_str(raw) {
                Ok(Signal::Buy) => TradeAction::Buy,
                Ok(Signal::Sell) => TradeAction::Sell,
                Ok(Signal::Neutral) => TradeAction::Hold,
                Err(_) => TradeAction::Unknown(Some(raw.to_string())),
            },
        }
    }
}

/// Outcome of one consumer poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub read: usize,
    pub written: usize,
    pub acked: usize,
    pub dispatched: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Fields;

    fn message(id: i64, pairs: &[(&str, &str)]) -> StreamMessage {
        StreamMessage {
            id: StreamId(id),
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Fields>(),
            delivery_count: 1,
        }
    }

    #[test]
    fn record_carries_fields_id_and_time() {
        let msg = message(7, &[("signal", "BUY"), ("time", "2024-01-01T00:00:00Z")]);
        let rec = ProcessedRecord::from_message(&msg).unwrap();

        assert_eq!(rec.original_id, StreamId(7));
        assert!(rec.processed);
        assert_eq!(rec.processed_at, "2024-01-01T00:00:00Z");

        let data: Value = serde_json::from_str(&rec.original_data).unwrap();
        assert_eq!(data["id"], "7");
        assert_eq!(data["signal"], "BUY");
        assert_eq!(data["time"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn record_without_time_is_rejected() {
        let msg = message(1, &[("signal", "SELL")]);
        assert!(matches!(
            ProcessedRecord::from_message(&msg),
            Err(NormalizeError::MissingField("time"))
        ));
    }

    #[test]
    fn actions_follow_signal_field() {
        assert_eq!(TradeAction::from_message(&message(1, &[("signal", "BUY")])), TradeAction::Buy);
        assert_eq!(TradeAction::from_message(&message(1, &[("signal", "SELL")])), TradeAction::Sell);
        assert_eq!(
            TradeAction::from_message(&message(1, &[("signal", "NEUTRAL")])),
            TradeAction::Hold
        );
        assert_eq!(
            TradeAction::from_message(&message(1, &[("signal", "HODL")])),
            TradeAction::Unknown(Some("HODL".into()))
        );
        assert_eq!(TradeAction::from_message(&message(1, &[])), TradeAction::Unknown(None));
    }
}
