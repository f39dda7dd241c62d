mod event;
mod sink;

pub use event::Event;
pub use sink::{EventSink, LoggingEventSink};
