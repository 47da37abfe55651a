use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Neutral,
}

impl Signal {
    /// Strict crossover rule: only a strictly higher (lower) short average
    /// is a buy (sell); equality is neutral.
    pub fn classify(short_sma: f64, long_sma: f64) -> Self {
        if short_sma > long_sma {
            Signal::Buy
        } else if short_sma < long_sma {
            Signal::Sell
        } else {
            Signal::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Neutral => "NEUTRAL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown signal {0:?}")]
pub struct UnknownSignal(pub String);

impl FromStr for Signal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Signal::Buy),
            "SELL" => Ok(Signal::Sell),
            "NEUTRAL" => Ok(Signal::Neutral),
            other => Err(UnknownSignal(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub signal: Signal,
    pub short_sma: f64,
    pub long_sma: f64,
    pub timestamp: DateTime<Utc>,
}
