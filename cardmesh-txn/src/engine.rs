// Drives 2PC as coordinator, answers it as participant, and exposes
// the handful of entry points the recovery sweeper needs to resume a
// stalled transaction. One `TransactionEngine` per peer process; the
// Coordination Service underneath it is the only thing that actually
// touches the State Store.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cardmesh_base::{kind_err, ErrorKind, PeerId, Result, TxId, TxIdMinter};
use cardmesh_events::{Event, EventSink};
use cardmesh_net::{DecideRequest, DecideResponse, PrepareRequest, PrepareResponse, RpcHandler, StatusRequest, StatusResponse, Transport};
use cardmesh_store::{AbortReason, Catalog, CoordinationService, Decision, Payload, Store, TxStatus, Vote};
use cardmesh_registry::Timeouts;
use tracing::{error, warn};

use crate::dispatch;
use crate::locks::TxLocks;

/// Every timeout the engine needs, converted once from the registry's
/// millisecond config into `Duration`s.
#[derive(Clone, Copy, Debug)]
pub struct EngineTimeouts {
    pub prepare: Duration,
    pub decide: Duration,
}

impl From<Timeouts> for EngineTimeouts {
    fn from(t: Timeouts) -> Self {
        EngineTimeouts {
            prepare: Duration::from_millis(t.prepare_ms),
            decide: Duration::from_millis(t.decide_ms),
        }
    }
}

const DECIDE_RETRY_ATTEMPTS: u32 = 5;
const DECIDE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

pub struct TransactionEngine<S: Store> {
    self_id: PeerId,
    participants: Vec<PeerId>,
    coord: CoordinationService<S>,
    transport: Arc<dyn Transport>,
    catalog: Arc<Catalog>,
    events: Arc<dyn EventSink>,
    minter: TxIdMinter,
    timeouts: EngineTimeouts,
    locks: TxLocks,
    sequence: AtomicI64,
}

impl<S: Store> TransactionEngine<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: PeerId,
        participants: Vec<PeerId>,
        coord: CoordinationService<S>,
        transport: Arc<dyn Transport>,
        catalog: Arc<Catalog>,
        events: Arc<dyn EventSink>,
        timeouts: EngineTimeouts,
    ) -> Self {
        TransactionEngine {
            minter: TxIdMinter::new(self_id.clone()),
            self_id,
            participants,
            coord,
            transport,
            catalog,
            events,
            timeouts,
            locks: TxLocks::new(),
            sequence: AtomicI64::new(0),
        }
    }

    pub fn coordination(&self) -> &CoordinationService<S> {
        &self.coord
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    fn next_sequence(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    // ---- Coordinator protocol (spec section 4.3.1) --------------------

    /// Begin a brand new transaction: mint an id, log it PREPARING,
    /// then drive it to a terminal decision.
    pub fn begin(&self, payload: Payload) -> Result<Decision> {
        let tx_id = self.minter.mint();
        let record = cardmesh_store::TransactionRecord::new(
            tx_id.clone(),
            payload.kind(),
            self.self_id.clone(),
            self.participants.clone(),
            payload,
            now_millis(),
        );
        self.coord.log_tx(&record)?;
        self.drive(&tx_id)
    }

    /// Resume an already-logged transaction from whatever state it's
    /// in. Used both by `begin` and by the recovery sweeper adopting a
    /// stalled PREPARING record.
    pub fn drive(&self, tx_id: &TxId) -> Result<Decision> {
        let record = self
            .coord
            .load_tx(tx_id)?
            .ok_or_else(|| kind_err(ErrorKind::UnknownTransaction, format!("no such transaction {tx_id}")))?;

        if let Some(decision) = record.decision {
            self.complete_delivery(tx_id)?;
            return Ok(decision);
        }

        let sequence = self.next_sequence();
        let prepare_req = PrepareRequest {
            sender: self.self_id.clone(),
            tx_id: tx_id.clone(),
            sequence,
            coordinator: record.coordinator.clone(),
            participants: record.participants.clone(),
            payload: record.payload.clone(),
        };

        let results: Mutex<Vec<(PeerId, Vote, Option<AbortReason>)>> = Mutex::new(Vec::new());
        let deadline = self.timeouts.prepare;
        std::thread::scope(|scope| {
            for peer in &record.participants {
                if *peer == self.self_id {
                    let (vote, reason) = self.do_prepare(tx_id, &record.coordinator, &record.participants, &record.payload);
                    results.lock().unwrap().push((peer.clone(), vote, reason));
                    continue;
                }
                let peer = peer.clone();
                let req = prepare_req.clone();
                let transport = self.transport.as_ref();
                let results = &results;
                scope.spawn(move || {
                    let (vote, reason) = match transport.prepare(&peer, &req, deadline) {
                        Ok(resp) => (resp.vote, resp.reason),
                        Err(e) => {
                            warn!(target: "cardmesh", peer = %peer, error = %e, "prepare rpc failed, treating as abort vote");
                            (Vote::Abort, Some(dispatch::reason_for_unreachable(&peer)))
                        }
                    };
                    results.lock().unwrap().push((peer, vote, reason));
                });
            }
        });

        let votes = results.into_inner().unwrap();
        let all_committed = votes.len() == record.participants.len() && votes.iter().all(|(_, v, _)| *v == Vote::Commit);
        let decision = if all_committed {
            Decision::Commit
        } else {
            let reason = votes
                .iter()
                .find_map(|(_, v, r)| if *v == Vote::Abort { *r } else { None })
                .unwrap_or(AbortReason::Conflict);
            Decision::Abort(reason)
        };

        let decided = self.coord.decide(tx_id, decision)?;
        let final_decision = decided.decision.unwrap_or(decision);
        self.events.emit(Event::TransactionDecided {
            tx_id: tx_id.clone(),
            kind: decided.kind,
            decision: final_decision,
        });
        self.complete_delivery(tx_id)?;
        Ok(final_decision)
    }

    /// Reassign the coordinator field to this peer and resume the
    /// protocol from PREPARE. Used by the recovery sweeper when the
    /// original coordinator appears to have died mid-PREPARING. Safe
    /// to call redundantly from more than one peer: the final decision
    /// is still singular because `CoordinationService::decide` only
    /// ever honors the first one (§4.3.3's "CAS ensures a single
    /// winner" is enforced there, not here).
    pub fn adopt_and_drive(&self, tx_id: &TxId) -> Result<Decision> {
        let self_id = self.self_id.clone();
        self.coord.update_tx(tx_id, move |r| {
            r.coordinator = self_id.clone();
            Ok(())
        })?;
        self.drive(tx_id)
    }

    /// Issue DECIDE to every participant (self in-process, others via
    /// transport with a bounded local retry budget) and mark the
    /// record COMPLETED once every ack is in.
    pub(crate) fn complete_delivery(&self, tx_id: &TxId) -> Result<()> {
        let record = self
            .coord
            .load_tx(tx_id)?
            .ok_or_else(|| kind_err(ErrorKind::UnknownTransaction, format!("no such transaction {tx_id}")))?;
        let decision = match record.decision {
            Some(d) => d,
            None => return Ok(()), // not yet decided; nothing to deliver
        };

        let sequence = self.next_sequence();
        let decide_req = DecideRequest {
            sender: self.self_id.clone(),
            tx_id: tx_id.clone(),
            sequence,
            decision,
            kind: record.kind,
            payload: record.payload.clone(),
            participants: record.participants.clone(),
        };
        let deadline = self.timeouts.decide;

        std::thread::scope(|scope| {
            for peer in &record.participants {
                if *peer == self.self_id {
                    if let Err(e) = self.do_decide(tx_id, &decide_req) {
                        error!(target: "cardmesh", error = %e, "local decide application failed");
                    }
                    continue;
                }
                let peer = peer.clone();
                let req = decide_req.clone();
                let transport = self.transport.as_ref();
                let coord = &self.coord;
                scope.spawn(move || {
                    deliver_decide_with_retries(transport, coord, &peer, &req, deadline);
                });
            }
        });

        self.coord.update_tx(tx_id, |r| {
            if r.all_acked() && r.status.can_advance_to(TxStatus::Completed) {
                r.status = TxStatus::Completed;
            }
            Ok(())
        })?;

        if let Some(r) = self.coord.load_tx(tx_id)? {
            if r.status == TxStatus::Completed {
                self.events.emit(Event::TransactionCompleted { tx_id: tx_id.clone() });
            }
        }
        Ok(())
    }

    // ---- Participant protocol (spec section 4.3.2) --------------------

    /// Shared by `RpcHandler::handle_prepare` and the coordinator's own
    /// in-process self-participation.
    fn do_prepare(
        &self,
        tx_id: &TxId,
        coordinator: &PeerId,
        participants: &[PeerId],
        payload: &Payload,
    ) -> (Vote, Option<AbortReason>) {
        let guard = self.locks.acquire(tx_id);
        let _held = guard.hold();

        match self.coord.load_tx(tx_id) {
            Ok(Some(record)) => {
                if matches!(
                    record.status,
                    TxStatus::VotedCommit | TxStatus::VotedAbort | TxStatus::GlobalCommit | TxStatus::GlobalAbort | TxStatus::Completed
                ) {
                    let vote = record.vote_of(&self.self_id).unwrap_or(Vote::Abort);
                    let reason = match vote {
                        Vote::Abort => Some(AbortReason::Conflict),
                        Vote::Commit => None,
                    };
                    return (vote, reason);
                }
            }
            Ok(None) => {
                let record = cardmesh_store::TransactionRecord::new(
                    tx_id.clone(),
                    payload.kind(),
                    coordinator.clone(),
                    participants.to_vec(),
                    payload.clone(),
                    now_millis(),
                );
                if let Err(e) = self.coord.log_tx(&record) {
                    error!(target: "cardmesh", error = %e, "failed to log late-seen transaction during prepare");
                    return (Vote::Abort, Some(AbortReason::StoreUnavailable));
                }
            }
            Err(e) => {
                error!(target: "cardmesh", error = %e, "failed to load transaction during prepare");
                return (Vote::Abort, Some(AbortReason::StoreUnavailable));
            }
        }

        let ops = dispatch::ops_for::<S>(payload, self.catalog.clone());
        let (vote, reason) = match ops.prepare(&self.coord, tx_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target: "cardmesh", error = %e, "prepare check failed");
                let reason = match e.kind() {
                    ErrorKind::StoreUnavailable => AbortReason::StoreUnavailable,
                    _ => AbortReason::Conflict,
                };
                (Vote::Abort, Some(reason))
            }
        };

        if let Err(e) = self.coord.record_vote(tx_id, &self.self_id, vote) {
            error!(target: "cardmesh", error = %e, "failed to persist vote");
            return (Vote::Abort, Some(AbortReason::StoreUnavailable));
        }
        (vote, reason)
    }

    /// Shared by `RpcHandler::handle_decide` and the coordinator's own
    /// in-process self-delivery.
    fn do_decide(&self, tx_id: &TxId, req: &DecideRequest) -> Result<()> {
        let guard = self.locks.acquire(tx_id);
        let _held = guard.hold();

        if self.coord.load_tx(tx_id)?.is_none() {
            let mut record = cardmesh_store::TransactionRecord::new(
                tx_id.clone(),
                req.kind,
                req.sender.clone(),
                req.participants.clone(),
                req.payload.clone(),
                now_millis(),
            );
            record.status = TxStatus::Preparing;
            self.coord.log_tx(&record)?;
        }

        self.coord.decide(tx_id, req.decision)?;
        let record = self
            .coord
            .load_tx(tx_id)?
            .ok_or_else(|| kind_err(ErrorKind::UnknownTransaction, format!("no such transaction {tx_id}")))?;

        let ops = dispatch::ops_for::<S>(&record.payload, self.catalog.clone());
        match record.decision.unwrap_or(req.decision) {
            Decision::Commit => ops.commit(&self.coord, tx_id)?,
            Decision::Abort(_) => ops.abort(&self.coord, tx_id)?,
        }
        self.coord.record_ack(tx_id, &self.self_id)?;
        self.coord.update_tx(tx_id, |r| {
            if r.all_acked() && r.status.can_advance_to(TxStatus::Completed) {
                r.status = TxStatus::Completed;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn do_status(&self, tx_id: &TxId) -> Result<StatusResponse> {
        match self.coord.load_tx(tx_id)? {
            Some(record) => Ok(StatusResponse {
                status: Some(record.status),
                vote: record.vote_of(&self.self_id),
                decision: record.decision,
            }),
            None => Ok(StatusResponse::unknown()),
        }
    }
}

impl<S: Store> RpcHandler for TransactionEngine<S> {
    fn handle_prepare(&self, req: PrepareRequest) -> Result<PrepareResponse> {
        let (vote, reason) = self.do_prepare(&req.tx_id, &req.coordinator, &req.participants, &req.payload);
        Ok(PrepareResponse { vote, reason })
    }

    fn handle_decide(&self, req: DecideRequest) -> Result<DecideResponse> {
        self.do_decide(&req.tx_id, &req)?;
        Ok(DecideResponse { ack: true })
    }

    fn handle_status(&self, req: StatusRequest) -> Result<StatusResponse> {
        self.do_status(&req.tx_id)
    }
}

fn deliver_decide_with_retries<S: Store>(
    transport: &dyn Transport,
    coord: &CoordinationService<S>,
    peer: &PeerId,
    req: &DecideRequest,
    deadline: Duration,
) {
    for attempt in 0..DECIDE_RETRY_ATTEMPTS {
        match transport.decide(peer, req, deadline) {
            Ok(resp) if resp.ack => {
                if let Err(e) = coord.record_ack(&req.tx_id, peer) {
                    error!(target: "cardmesh", error = %e, peer = %peer, "failed to record ack");
                }
                return;
            }
            Ok(_) => {
                warn!(target: "cardmesh", peer = %peer, "decide rpc returned unacked response");
            }
            Err(e) => {
                warn!(target: "cardmesh", attempt, peer = %peer, error = %e, "decide rpc failed, retrying");
            }
        }
        std::thread::sleep(DECIDE_RETRY_BACKOFF);
    }
    warn!(target: "cardmesh", peer = %peer, "exhausted local decide retry budget, leaving to recovery");
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
