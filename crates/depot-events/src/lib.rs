mod event;
mod sink;

use std::sync::Arc;

pub use event::*;
pub use sink::*;

/// Shared handle to an event sink.
pub type EventSinkHandle = Arc<dyn EventSink>;

/// Returns a sink that drops every event.
pub fn null_sink() -> EventSinkHandle {
    Arc::new(NullSink)
}
