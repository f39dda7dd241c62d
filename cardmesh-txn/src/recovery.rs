// Background sweeper, spec.md section 4.3.3: scans the transaction
// log for records stalled past `T_recovery` and nudges them forward.
// Runs on its own thread, strictly separate from request-handling
// threads, polling at a configurable interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cardmesh_base::{PeerId, Result, TxId};
use cardmesh_store::{AbortReason, Decision, Store, TxStatus};
use tracing::{debug, error, info};

use crate::engine::TransactionEngine;

pub struct RecoverySweeper<S: Store> {
    engine: Arc<TransactionEngine<S>>,
    poll_interval: Duration,
    recovery_age: Duration,
    block_max: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<S: Store> RecoverySweeper<S> {
    pub fn new(engine: Arc<TransactionEngine<S>>, poll_interval: Duration, recovery_age: Duration, block_max: Duration) -> Self {
        RecoverySweeper {
            engine,
            poll_interval,
            recovery_age,
            block_max,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until `shutdown` is set. Intended to be the body of a
    /// dedicated thread spawned by the `cardmesh` binary.
    pub fn run(&self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.sweep_once() {
                error!(target: "cardmesh", error = %e, "recovery sweep failed");
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    pub fn sweep_once(&self) -> Result<()> {
        let now = now_millis();
        for tx_id in self.engine.coordination().nonterminal_tx_ids()? {
            if let Err(e) = self.maybe_recover(&tx_id, now) {
                error!(target: "cardmesh", tx_id = %tx_id, error = %e, "recovery step failed");
            }
        }
        Ok(())
    }

    fn maybe_recover(&self, tx_id: &TxId, now: i64) -> Result<()> {
        let record = match self.engine.coordination().load_tx(tx_id)? {
            Some(r) => r,
            None => return Ok(()),
        };
        let age = Duration::from_millis((now - record.last_update_millis).max(0) as u64);
        if age < self.recovery_age {
            return Ok(());
        }

        match record.status {
            TxStatus::Preparing => {
                info!(target: "cardmesh", tx_id = %tx_id, "adopting stalled coordinator");
                self.engine.adopt_and_drive(tx_id)?;
            }
            TxStatus::GlobalCommit | TxStatus::GlobalAbort => {
                debug!(target: "cardmesh", tx_id = %tx_id, "completing stalled decision delivery");
                self.engine.complete_delivery(tx_id)?;
            }
            TxStatus::VotedAbort => {
                // Unanimity is required for COMMIT; this peer already
                // voted ABORT, so the only possible global decision is
                // ABORT. Safe to write it unilaterally: `decide` is a
                // no-op if some other actor already recorded COMMIT,
                // which cannot have legitimately happened here anyway.
                self.engine.coordination().decide(tx_id, Decision::Abort(AbortReason::Timeout))?;
                self.engine.complete_delivery(tx_id)?;
            }
            TxStatus::VotedCommit if record.all_voted_commit() => {
                // Every participant's vote is already visible in this
                // (centralized) record, so there's no need to wait out
                // the classic 2PC blocking window: unanimity is
                // already known, not merely assumed.
                info!(target: "cardmesh", tx_id = %tx_id, "all participants already voted commit, deciding commit");
                self.engine.coordination().decide(tx_id, Decision::Commit)?;
                self.engine.complete_delivery(tx_id)?;
            }
            TxStatus::VotedCommit if age >= self.block_max => {
                if self.is_designated_recoverer(&record.participants) {
                    info!(target: "cardmesh", tx_id = %tx_id, "blocking window exceeded, aborting by quorum election");
                    // Safe without a separate peer poll: `decide` only
                    // ever honors the first decision recorded against
                    // this (centralized) record, so a stray COMMIT
                    // written concurrently elsewhere cannot be
                    // clobbered by this ABORT.
                    self.engine.coordination().decide(tx_id, Decision::Abort(AbortReason::Timeout))?;
                    self.engine.complete_delivery(tx_id)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Lowest peer id among the participant set is the designated
    /// recoverer for the blocking-window case (spec.md section
    /// 4.3.3), avoiding every surviving peer racing to decide at once.
    fn is_designated_recoverer(&self, participants: &[PeerId]) -> bool {
        participants.iter().min_by(|a, b| a.0.cmp(&b.0)) == Some(self.engine.self_id())
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod test {
    use super::*;
    use cardmesh_base::{PeerId as Pid, TxIdMinter};
    use cardmesh_events::LoggingEventSink;
    use cardmesh_net::LoopbackTransport;
    use cardmesh_registry::Timeouts;
    use cardmesh_store::{Catalog, CoordinationService, MemStore, OpenPackPayload, Payload};
    use std::sync::Arc;

    fn engine(self_id: &str, peers: Vec<&str>, store: Arc<MemStore>, transport: Arc<LoopbackTransport>) -> Arc<TransactionEngine<Arc<MemStore>>> {
        let coord = CoordinationService::new(store);
        let timeouts: crate::engine::EngineTimeouts = Timeouts::default().into();
        Arc::new(TransactionEngine::new(
            Pid::from(self_id),
            peers.into_iter().map(Pid::from).collect(),
            coord,
            transport,
            Arc::new(Catalog::default()),
            Arc::new(LoggingEventSink),
            timeouts,
        ))
    }

    #[test]
    fn adopts_stalled_preparing_transaction() {
        let store = Arc::new(MemStore::new());
        let transport = Arc::new(LoopbackTransport::new());
        let norte = engine("norte", vec!["norte", "sul"], store.clone(), transport.clone());
        let sul = engine("sul", vec!["norte", "sul"], store.clone(), transport.clone());
        norte.coordination().bootstrap_stock(5).unwrap();
        transport.register(Pid::from("norte"), norte.clone());
        transport.register(Pid::from("sul"), sul.clone());

        let minter = TxIdMinter::new(Pid::from("norte"));
        let tx_id = minter.mint();
        let record = cardmesh_store::TransactionRecord::new(
            tx_id.clone(),
            cardmesh_store::TxKind::OpenPack,
            Pid::from("norte"),
            vec![Pid::from("norte"), Pid::from("sul")],
            Payload::OpenPack(OpenPackPayload {
                player_id: "alice".into(),
                pack_template_id: "starter".into(),
            }),
            0, // ancient last_update_millis: immediately eligible for recovery
        );
        norte.coordination().log_tx(&record).unwrap();

        let sweeper = RecoverySweeper::new(sul.clone(), Duration::from_millis(10), Duration::from_millis(0), Duration::from_secs(600));
        sweeper.sweep_once().unwrap();

        let decided = sul.coordination().load_tx(&tx_id).unwrap().unwrap();
        assert!(decided.status == TxStatus::Completed || decided.status == TxStatus::GlobalCommit);
        assert_eq!(decided.decision, Some(Decision::Commit));
    }
}
