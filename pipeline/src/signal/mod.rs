pub mod extract;
pub mod processor;
pub mod scheduler;
pub mod sma;
pub mod types;

pub use processor::SignalProcessor;
pub use scheduler::run_signal_scheduler;
pub use types::{Signal, TradeSignal};
