use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::stream::GroupStart;

/// Process-wide configuration, resolved once at startup and handed to each
/// component as the narrow section it needs.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub signal: SignalConfig,
    pub stream: StreamConfig,
    pub consumer: ConsumerConfig,
}

#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Depth stream endpoint, e.g. `wss://stream.binance.com:9443/ws/btcusdt@depth`.
    pub url: String,

    /// Handshake attempts before the connection fault becomes terminal.
    pub max_retries: u32,

    /// Fixed delay between handshake attempts (no exponential growth).
    pub retry_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub database_url: String,

    /// Update Store retention. Rows older than this are expired by the
    /// store itself; the application never deletes them.
    pub retention: Duration,
}

#[derive(Clone, Debug)]
pub struct SignalConfig {
    pub short_period: usize,
    pub long_period: usize,

    /// Cadence of the signal scheduler, independent of ingestion.
    pub interval: Duration,

    /// Upper bound on a single tick (query + compute + side effects).
    pub tick_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Log the processor publishes signals to.
    pub signal_stream: String,
    /// Output log the consumer writes processed records to.
    pub processed_stream: String,
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub group: String,
    pub consumer: String,
    pub group_start: GroupStart,

    /// Max messages per read.
    pub read_count: usize,

    /// How long a read waits for new entries; `None` returns immediately.
    pub read_block: Option<Duration>,

    pub poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Missing keys
    /// take their defaults; present but malformed values are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let feed = FeedConfig {
            url: env.string(
                "FEED_URL",
                "wss://stream.binance.com:9443/ws/btcusdt@depth",
            ),
            max_retries: env.parse("MAX_CONNECTION_RETRY", 5)?,
            retry_delay: Duration::from_millis(env.parse("RETRY_DELAY_MS", 2_000)?),
        };

        let store = StoreConfig {
            database_url: env.string("DATABASE_URL", "sqlite://pipeline_dev.db?mode=rwc"),
            retention: Duration::from_secs(env.parse("UPDATE_RETENTION_SECS", 7 * 24 * 60 * 60)?),
        };

        let signal = SignalConfig {
            short_period: env.parse("SHORT_PERIOD", 50)?,
            long_period: env.parse("LONG_PERIOD", 200)?,
            interval: Duration::from_secs(env.parse("SIGNAL_INTERVAL_SECS", 300)?),
            tick_timeout: Duration::from_secs(env.parse("SIGNAL_TIMEOUT_SECS", 30)?),
        };

        let stream = StreamConfig {
            signal_stream: env.string("SIGNAL_STREAM", "trade_signals_stream"),
            processed_stream: env.string("PROCESSED_STREAM", "processed_signals"),
        };

        let read_block_ms: u64 = env.parse("READ_BLOCK_MS", 0)?;
        let consumer = ConsumerConfig {
            group: env.string("CONSUMER_GROUP", "signal_group"),
            consumer: env.string("CONSUMER_NAME", "signal_consumer"),
            group_start: env.parse("GROUP_START", GroupStart::Latest)?,
            read_count: env.parse("READ_COUNT", 10)?,
            read_block: (read_block_ms > 0).then(|| Duration::from_millis(read_block_ms)),
            poll_interval: Duration::from_millis(env.parse("POLL_INTERVAL_MS", 2_000)?),
        };

        let cfg = Self {
            feed,
            store,
            signal,
            stream,
            consumer,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.signal.short_period == 0 || self.signal.short_period > self.signal.long_period {
            return Err(ConfigError::Invalid {
                key: "SHORT_PERIOD",
                value: self.signal.short_period.to_string(),
                reason: format!("must be in 1..={}", self.signal.long_period),
            });
        }
        if self.feed.max_retries == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONNECTION_RETRY",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        if self.consumer.read_count == 0 {
            return Err(ConfigError::Invalid {
                key: "READ_COUNT",
                value: "0".into(),
                reason: "must read at least one message".into(),
            });
        }
        // Periodic loops and the tick deadline cannot run on a zero period.
        for (key, period) in [
            ("SIGNAL_INTERVAL_SECS", self.signal.interval),
            ("SIGNAL_TIMEOUT_SECS", self.signal.tick_timeout),
            ("POLL_INTERVAL_MS", self.consumer.poll_interval),
        ] {
            if period.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    value: "0".into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value: raw,
            }),
        }
    }
}
