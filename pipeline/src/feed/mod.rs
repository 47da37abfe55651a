pub mod collector;
pub mod connector;
pub mod types;

pub use collector::DataCollectorService;
pub use connector::{FeedConnector, FeedEvent, FeedHandle, FeedSource};
pub use types::{OrderBookData, OrderBookUpdate, PriceLevel, StoredUpdate};
