use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::task::TaskPanic;

/// Faults raised by the feed connector and its background reader.
///
/// Only `Connection` (handshake retries exhausted) is fatal to the process.
/// The others, including a recovered reader panic, end the collector run
/// and are logged.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed connection failed after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: tungstenite::Error,
    },

    #[error("feed closed unexpectedly (code {code:?}): {reason}")]
    UnexpectedClose { code: Option<u16>, reason: String },

    #[error("feed read failed: {0}")]
    Read(#[from] tungstenite::Error),

    #[error(transparent)]
    Panicked(#[from] TaskPanic),
}

impl FeedError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FeedError::Connection { .. })
    }
}

/// A feed payload that could not be decoded into an order book update.
#[derive(Error, Debug)]
#[error("malformed feed payload: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("not enough priced records: need {required}, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("unparseable price {raw:?} at window position {position}")]
    Extraction { position: usize, raw: String },

    #[error("invalid periods: short={short} long={long}")]
    InvalidPeriods { short: usize, long: usize },

    #[error("update store query failed: {0:#}")]
    Store(anyhow::Error),

    #[error("signal tick exceeded {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("consumer group {group:?} does not exist on stream {stream:?}")]
    NoGroup { stream: String, group: String },

    #[error("stream storage error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("corrupt stream entry: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
