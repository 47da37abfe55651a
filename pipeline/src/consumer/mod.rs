pub mod dispatch;
pub mod output;
pub mod processor;
pub mod types;

pub use dispatch::{ActionDispatcher, LoggingDispatcher};
pub use output::{ProcessedLog, SqlxProcessedLog};
pub use processor::MessageProcessor;
pub use types::{BatchReport, NormalizeError, ProcessedRecord, TradeAction};
