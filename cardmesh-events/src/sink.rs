// At-least-once is the whole contract here: a sink may be called more
// than once for the same event (retried decide fan-out, recovery
// replay) and must tolerate it, just as the Coordination Service
// tolerates duplicate calls to its own operations.

use crate::event::Event;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default sink: log the event at info level and move on. A real
/// deployment swaps this for a Pub/Sub-backed implementation outside
/// this crate's scope.
#[derive(Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event: Event) {
        tracing::info!(target: "cardmesh", ?event, "domain event");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cardmesh_base::{PeerId, TxIdMinter};
    use cardmesh_store::{Decision, TxKind};

    #[test]
    fn logging_sink_does_not_panic() {
        let minter = TxIdMinter::new(PeerId::from("norte"));
        let sink = LoggingEventSink;
        sink.emit(Event::TransactionDecided {
            tx_id: minter.mint(),
            kind: TxKind::OpenPack,
            decision: Decision::Commit,
        });
    }
}
