//! Signal Log: an append-only, ordered log with consumer groups.
//!
//! Delivery model (per group):
//! - every entry is handed to exactly one consumer of the group;
//! - a delivered entry stays pending for that consumer until acked;
//! - pending entries are redelivered to the same consumer on its next read;
//! - an acked entry is never delivered to the group again.

pub mod log_sqlx;
pub mod publisher;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StreamError;

pub use log_sqlx::SqlxSignalLog;
pub use publisher::{SignalPublisher, StreamSignalPublisher, signal_fields};

/// Flat field set of one log entry.
pub type Fields = BTreeMap<String, String>;

/// Log-assigned entry id; strictly increasing in append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub i64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(StreamId)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub id: StreamId,
    pub fields: Fields,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

impl StreamMessage {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Where a newly created group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Only entries appended after the group is created.
    Latest,
    /// Every entry already in the log.
    Beginning,
}

impl FromStr for GroupStart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" | "$" => Ok(GroupStart::Latest),
            "beginning" | "0" => Ok(GroupStart::Beginning),
            other => Err(format!("expected `latest` or `beginning`, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: StreamId,
    pub consumer: String,
    pub delivery_count: u32,
}

#[async_trait]
pub trait SignalLog: Send + Sync {
    /// Appends an entry; returns its id.
    async fn publish(&self, stream: &str, fields: &Fields) -> Result<StreamId, StreamError>;

    /// Creates `group` on `stream`. Returns `false`, not an error, when the
    /// group already exists.
    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, StreamError>;

    /// Up to `count` entries for `consumer`: its own pending entries first,
    /// then entries never delivered to the group. Returned entries are
    /// pending for `consumer` until acked. With `block`, waits up to that
    /// long for something to arrive.
    ///
    /// An entry whose fields cannot be decoded is logged at `warn` and
    /// passed over: the group moves past it, it never becomes pending and
    /// it is not returned, so the batch may hold fewer than `count`
    /// entries even when more exist.
    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamMessage>, StreamError>;

    /// Removes `id` from the group's pending set. Returns whether it was
    /// pending.
    async fn ack(&self, stream: &str, group: &str, id: StreamId) -> Result<bool, StreamError>;

    /// The group's pending entries, oldest first.
    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StreamError>;
}
