pub mod logger;
pub mod shutdown;

pub use logger::{TraceId, annotate_span, child_span, init_tracing, root_span, warn_if_slow};
pub use shutdown::{Shutdown, ShutdownTrigger};
