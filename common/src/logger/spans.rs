use tracing::{Span, field};

use super::TraceId;

/// Root span for one unit of scheduled work (a signal tick, a poll cycle).
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id,
        stream = field::Empty,
        message_id = field::Empty
    )
}

pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        stream = field::Empty,
        message_id = field::Empty
    )
}

/// Records the stream (and optionally the message) the current span works on.
pub fn annotate_span(stream: &str, message_id: Option<&str>) {
    let span = Span::current();
    span.record("stream", field::display(stream));
    if let Some(id) = message_id {
        span.record("message_id", field::display(id));
    }
}
