// The Coordination Service: the only component that touches the State
// Store. Every method here is a composite CAS built from the
// `cas_retry` primitive in `store.rs`; none of them know anything
// about PREPARE/DECIDE/recovery, that's `cardmesh-txn`'s job.

use std::time::{SystemTime, UNIX_EPOCH};

use cardmesh_base::{kind_err, Error, ErrorKind, PeerId, Result, TxId};
use serde::de::DeserializeOwned;

use crate::keys;
use crate::store::{cas_retry, CasStep, Snapshot, Store, Write};
use crate::types::{
    contains_all, remove_all, CardId, CardMultiset, Decision, ReservedPack, SwapIntent,
    TransactionRecord, TxStatus, Vote,
};

const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    OutOfStock,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Prepared,
    MissingCards,
    Conflict,
}

pub struct CoordinationService<S> {
    store: S,
    max_retries: u32,
}

impl<S: Store> CoordinationService<S> {
    pub fn new(store: S) -> Self {
        CoordinationService {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(store: S, max_retries: u32) -> Self {
        CoordinationService { store, max_retries }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Set the initial stock value, once, at system bootstrap. A
    /// no-op if stock is already initialized (idempotent restart).
    pub fn bootstrap_stock(&self, initial: i64) -> Result<()> {
        let key = keys::stock_packs();
        let keys_v = vec![key];
        cas_retry(&self.store, &keys_v, self.max_retries, |snap| {
            if snap.get(0).is_some() {
                return Ok(CasStep::Done(()));
            }
            Ok(CasStep::Write(
                vec![Write::Put(initial.to_string().into_bytes())],
                (),
            ))
        })
    }

    pub fn stock_remaining(&self) -> Result<i64> {
        let key = keys::stock_packs();
        let snap = self.store.read(&[key])?;
        Ok(parse_i64(snap.get(0)).unwrap_or(0))
    }

    /// `reserve_pack(tx_id) -> {RESERVED, OUT_OF_STOCK, CONFLICT}`.
    pub fn reserve_pack(
        &self,
        tx_id: &TxId,
        player_id: &str,
        pack_template_id: &str,
    ) -> Result<ReserveOutcome> {
        let stock_key = keys::stock_packs();
        let res_key = keys::stock_reservation(tx_id);
        let keys_v = vec![stock_key, res_key];
        absorb_conflict(
            cas_retry(&self.store, &keys_v, self.max_retries, |snap| {
                if snap.get(1).is_some() {
                    // Duplicate PREPARE for a tx we've already reserved for.
                    return Ok(CasStep::Done(ReserveOutcome::Reserved));
                }
                let remaining = parse_i64(snap.get(0)).unwrap_or(0);
                if remaining <= 0 {
                    return Ok(CasStep::Done(ReserveOutcome::OutOfStock));
                }
                let reservation = ReservedPack {
                    tx_id: tx_id.clone(),
                    player_id: player_id.to_string(),
                    pack_template_id: pack_template_id.to_string(),
                };
                let writes = vec![
                    Write::Put((remaining - 1).to_string().into_bytes()),
                    Write::Put(serde_json::to_vec(&reservation)?),
                ];
                Ok(CasStep::Write(writes, ReserveOutcome::Reserved))
            }),
            ReserveOutcome::Conflict,
        )
    }

    /// `release_pack(tx_id) -> ok`, idempotent.
    pub fn release_pack(&self, tx_id: &TxId) -> Result<()> {
        let stock_key = keys::stock_packs();
        let res_key = keys::stock_reservation(tx_id);
        let keys_v = vec![stock_key, res_key];
        cas_retry(&self.store, &keys_v, self.max_retries, |snap| {
            if snap.get(1).is_none() {
                return Ok(CasStep::Done(()));
            }
            let remaining = parse_i64(snap.get(0)).unwrap_or(0);
            let writes = vec![
                Write::Put((remaining + 1).to_string().into_bytes()),
                Write::Delete,
            ];
            Ok(CasStep::Write(writes, ()))
        })
    }

    /// `materialize_pack(tx_id, player_id, card_ids) -> ok`, idempotent.
    pub fn materialize_pack(
        &self,
        tx_id: &TxId,
        player_id: &str,
        card_ids: &[CardId],
    ) -> Result<()> {
        let res_key = keys::stock_reservation(tx_id);
        let inv_key = keys::inventory(player_id);
        let marker_key = keys::materialized_marker(tx_id);
        let keys_v = vec![res_key, inv_key, marker_key];
        cas_retry(&self.store, &keys_v, self.max_retries, |snap| {
            if snap.get(2).is_some() {
                return Ok(CasStep::Done(()));
            }
            if snap.get(0).is_none() {
                return Err(kind_err(
                    ErrorKind::Conflict,
                    "materialize_pack: no reservation and not previously applied",
                ));
            }
            let mut inventory: CardMultiset = decode_or_default(snap.get(1))?;
            inventory.extend(card_ids.iter().cloned());
            let writes = vec![
                Write::Delete,
                Write::Put(serde_json::to_vec(&inventory)?),
                Write::Put(b"1".to_vec()),
            ];
            Ok(CasStep::Write(writes, ()))
        })
    }

    /// `verify_and_swap(...) -> {PREPARED, MISSING_CARDS, CONFLICT}`.
    /// Confirms both hands, then withdraws each side's outgoing cards
    /// immediately (mirroring `reserve_pack`'s withdraw-at-PREPARE,
    /// return-on-abort pattern) so a second, concurrent trade over the
    /// same card can never also observe it as present and vote COMMIT.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_and_swap(
        &self,
        tx_id: &TxId,
        player_a: &str,
        cards_a_out: &[CardId],
        player_b: &str,
        cards_b_out: &[CardId],
    ) -> Result<VerifyOutcome> {
        let inv_a_key = keys::inventory(player_a);
        let inv_b_key = keys::inventory(player_b);
        let intent_key = keys::swap_intent(tx_id);
        let keys_v = vec![inv_a_key, inv_b_key, intent_key];
        absorb_conflict(
            cas_retry(&self.store, &keys_v, self.max_retries, |snap| {
                if snap.get(2).is_some() {
                    return Ok(CasStep::Done(VerifyOutcome::Prepared));
                }
                let mut inv_a: CardMultiset = decode_or_default(snap.get(0))?;
                let mut inv_b: CardMultiset = decode_or_default(snap.get(1))?;
                if !contains_all(&inv_a, cards_a_out) || !contains_all(&inv_b, cards_b_out) {
                    return Ok(CasStep::Done(VerifyOutcome::MissingCards));
                }
                remove_all(&mut inv_a, cards_a_out);
                remove_all(&mut inv_b, cards_b_out);
                let intent = SwapIntent {
                    tx_id: tx_id.clone(),
                    player_a: player_a.to_string(),
                    cards_a_out: cards_a_out.to_vec(),
                    player_b: player_b.to_string(),
                    cards_b_out: cards_b_out.to_vec(),
                };
                let writes = vec![
                    Write::Put(serde_json::to_vec(&inv_a)?),
                    Write::Put(serde_json::to_vec(&inv_b)?),
                    Write::Put(serde_json::to_vec(&intent)?),
                ];
                Ok(CasStep::Write(writes, VerifyOutcome::Prepared))
            }),
            VerifyOutcome::Conflict,
        )
    }

    /// `apply_swap(tx_id) -> ok`, idempotent. The outgoing cards were
    /// already withdrawn at PREPARE time; committing only needs to
    /// hand each side the cards it's receiving.
    pub fn apply_swap(&self, tx_id: &TxId) -> Result<()> {
        let intent_key = keys::swap_intent(tx_id);
        let probe = self.store.read(&[intent_key.clone()])?;
        let intent: Option<SwapIntent> = match probe.get(0) {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };
        let intent = match intent {
            Some(i) => i,
            None => return Ok(()), // already applied, or cancelled: idempotent no-op
        };
        let inv_a_key = keys::inventory(&intent.player_a);
        let inv_b_key = keys::inventory(&intent.player_b);
        let keys_v = vec![intent_key, inv_a_key, inv_b_key];
        cas_retry(&self.store, &keys_v, self.max_retries, |snap| {
            if snap.get(0).is_none() {
                return Ok(CasStep::Done(()));
            }
            let mut inv_a: CardMultiset = decode_or_default(snap.get(1))?;
            let mut inv_b: CardMultiset = decode_or_default(snap.get(2))?;
            inv_a.extend(intent.cards_b_out.iter().cloned());
            inv_b.extend(intent.cards_a_out.iter().cloned());
            let writes = vec![
                Write::Delete,
                Write::Put(serde_json::to_vec(&inv_a)?),
                Write::Put(serde_json::to_vec(&inv_b)?),
            ];
            Ok(CasStep::Write(writes, ()))
        })
    }

    /// `cancel_swap(tx_id) -> ok`, idempotent. Returns each side's
    /// withdrawn cards if PREPARE got as far as withdrawing them.
    pub fn cancel_swap(&self, tx_id: &TxId) -> Result<()> {
        let intent_key = keys::swap_intent(tx_id);
        let probe = self.store.read(&[intent_key.clone()])?;
        let intent: Option<SwapIntent> = match probe.get(0) {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };
        let intent = match intent {
            Some(i) => i,
            None => return Ok(()), // nothing was withdrawn: idempotent no-op
        };
        let inv_a_key = keys::inventory(&intent.player_a);
        let inv_b_key = keys::inventory(&intent.player_b);
        let keys_v = vec![intent_key, inv_a_key, inv_b_key];
        cas_retry(&self.store, &keys_v, self.max_retries, |snap| {
            if snap.get(0).is_none() {
                return Ok(CasStep::Done(()));
            }
            let mut inv_a: CardMultiset = decode_or_default(snap.get(1))?;
            let mut inv_b: CardMultiset = decode_or_default(snap.get(2))?;
            inv_a.extend(intent.cards_a_out.iter().cloned());
            inv_b.extend(intent.cards_b_out.iter().cloned());
            let writes = vec![
                Write::Delete,
                Write::Put(serde_json::to_vec(&inv_a)?),
                Write::Put(serde_json::to_vec(&inv_b)?),
            ];
            Ok(CasStep::Write(writes, ()))
        })
    }

    pub fn inventory_of(&self, player_id: &str) -> Result<CardMultiset> {
        let key = keys::inventory(player_id);
        let snap = self.store.read(&[key])?;
        decode_or_default(snap.get(0))
    }

    /// `log_tx(record)`: create the log entry, once. Idempotent if a
    /// record for this id already exists (a retried PREPARE send from
    /// a slow coordinator must not clobber it).
    pub fn log_tx(&self, record: &TransactionRecord) -> Result<()> {
        let rec_key = keys::tx_record(&record.tx_id);
        let marker_key = keys::tx_nonterminal_marker(&record.tx_id);
        let keys_v = vec![rec_key, marker_key];
        cas_retry(&self.store, &keys_v, self.max_retries, |snap| {
            if snap.get(0).is_some() {
                return Ok(CasStep::Done(()));
            }
            let writes = vec![
                Write::Put(serde_json::to_vec(record)?),
                Write::Put(serde_json::to_vec(&record.tx_id)?),
            ];
            Ok(CasStep::Write(writes, ()))
        })
    }

    /// `load_tx(tx_id)`.
    pub fn load_tx(&self, tx_id: &TxId) -> Result<Option<TransactionRecord>> {
        let rec_key = keys::tx_record(tx_id);
        let snap = self.store.read(&[rec_key])?;
        decode_optional(snap.get(0))
    }

    /// Generic CAS-guarded mutation of a transaction record. Every
    /// other `update_*` method below is a thin wrapper around this.
    pub fn update_tx(
        &self,
        tx_id: &TxId,
        mutate: impl Fn(&mut TransactionRecord) -> Result<()>,
    ) -> Result<TransactionRecord> {
        let rec_key = keys::tx_record(tx_id);
        let marker_key = keys::tx_nonterminal_marker(tx_id);
        let keys_v = vec![rec_key, marker_key];
        cas_retry(&self.store, &keys_v, self.max_retries, |snap: &Snapshot| {
            let mut record: TransactionRecord = match snap.get(0) {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => {
                    return Err(kind_err(
                        ErrorKind::UnknownTransaction,
                        format!("no such transaction {tx_id}"),
                    ))
                }
            };
            mutate(&mut record)?;
            record.last_update_millis = now_millis();
            let marker_write = if record.status.is_terminal() {
                Write::Delete
            } else {
                Write::Keep
            };
            let rec_bytes = serde_json::to_vec(&record)?;
            Ok(CasStep::Write(vec![Write::Put(rec_bytes), marker_write], record))
        })
    }

    /// `update_tx_status(tx_id, status)`: a CAS that enforces I4 (no
    /// regressions in the state machine).
    pub fn update_tx_status(&self, tx_id: &TxId, status: TxStatus) -> Result<TransactionRecord> {
        self.update_tx(tx_id, |record| {
            if !record.status.can_advance_to(status) {
                return Err(kind_err(
                    ErrorKind::ProtocolViolation,
                    format!("illegal transition {:?} -> {:?}", record.status, status),
                ));
            }
            record.status = status;
            Ok(())
        })
    }

    /// Reach the transaction's global decision: CAS from PREPARING (or
    /// any pre-decision status) to GLOBAL_COMMIT/GLOBAL_ABORT and
    /// stamp the decision itself, atomically. If the record has
    /// already been decided (by a racing coordinator or a recovering
    /// peer), this is a no-op and the caller must adopt the existing
    /// decision rather than treat the CAS failure as an error — callers
    /// get that via `load_tx` after a `ProtocolViolation` here.
    pub fn decide(&self, tx_id: &TxId, decision: Decision) -> Result<TransactionRecord> {
        let target = match decision {
            Decision::Commit => TxStatus::GlobalCommit,
            Decision::Abort(_) => TxStatus::GlobalAbort,
        };
        self.update_tx(tx_id, |record| {
            if record.decision.is_some() {
                return Ok(());
            }
            if !record.status.can_advance_to(target) {
                return Err(kind_err(
                    ErrorKind::ProtocolViolation,
                    format!("illegal transition {:?} -> {:?}", record.status, target),
                ));
            }
            record.status = target;
            record.decision = Some(decision);
            Ok(())
        })
    }

    /// Record one participant's vote and advance this replica's view
    /// of the record to VOTED_COMMIT/VOTED_ABORT. The durability
    /// boundary of the participant's promise (invariant I5): callers
    /// must not answer PREPARE until this returns.
    pub fn record_vote(&self, tx_id: &TxId, peer: &PeerId, vote: Vote) -> Result<TransactionRecord> {
        self.update_tx(tx_id, |record| {
            let target = if vote == Vote::Commit {
                TxStatus::VotedCommit
            } else {
                TxStatus::VotedAbort
            };
            if record.status.can_advance_to(target) {
                record.status = target;
            }
            record.record_vote(peer, vote);
            Ok(())
        })
    }

    /// Record that `peer` acknowledged DECIDE for this transaction.
    pub fn record_ack(&self, tx_id: &TxId, peer: &PeerId) -> Result<TransactionRecord> {
        self.update_tx(tx_id, |record| {
            record.ack(peer);
            Ok(())
        })
    }

    /// Transaction ids still awaiting a terminal status, for the
    /// recovery sweeper.
    pub fn nonterminal_tx_ids(&self) -> Result<Vec<TxId>> {
        let entries = self.store.scan_prefix("tx_index:nonterminal:")?;
        entries
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(Error::from))
            .collect()
    }
}

fn absorb_conflict<T>(result: Result<T>, on_conflict: T) -> Result<T> {
    match result {
        Err(e) if e.kind() == ErrorKind::Conflict => Ok(on_conflict),
        other => other,
    }
}

fn parse_i64(bytes: Option<&Vec<u8>>) -> Option<i64> {
    bytes
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse().ok())
}

fn decode_or_default<T: DeserializeOwned + Default>(bytes: Option<&Vec<u8>>) -> Result<T> {
    match bytes {
        Some(b) => Ok(serde_json::from_slice(b)?),
        None => Ok(T::default()),
    }
}

fn decode_optional<T: DeserializeOwned>(bytes: Option<&Vec<u8>>) -> Result<Option<T>> {
    match bytes {
        Some(b) => Ok(Some(serde_json::from_slice(b)?)),
        None => Ok(None),
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::MemStore;

    fn minter() -> cardmesh_base::TxIdMinter {
        cardmesh_base::TxIdMinter::new(PeerId::from("norte"))
    }

    #[test]
    fn reserve_then_release_restores_stock() {
        let svc = CoordinationService::new(MemStore::new());
        svc.bootstrap_stock(2).unwrap();
        let minter = minter();
        let tx = minter.mint();

        assert_eq!(
            svc.reserve_pack(&tx, "alice", "starter").unwrap(),
            ReserveOutcome::Reserved
        );
        assert_eq!(svc.stock_remaining().unwrap(), 1);

        // Idempotent re-PREPARE.
        assert_eq!(
            svc.reserve_pack(&tx, "alice", "starter").unwrap(),
            ReserveOutcome::Reserved
        );
        assert_eq!(svc.stock_remaining().unwrap(), 1);

        svc.release_pack(&tx).unwrap();
        assert_eq!(svc.stock_remaining().unwrap(), 2);
        // Idempotent release.
        svc.release_pack(&tx).unwrap();
        assert_eq!(svc.stock_remaining().unwrap(), 2);
    }

    #[test]
    fn stock_exhaustion_returns_out_of_stock() {
        let svc = CoordinationService::new(MemStore::new());
        svc.bootstrap_stock(1).unwrap();
        let minter = minter();
        let tx1 = minter.mint();
        let tx2 = minter.mint();

        assert_eq!(
            svc.reserve_pack(&tx1, "alice", "starter").unwrap(),
            ReserveOutcome::Reserved
        );
        assert_eq!(
            svc.reserve_pack(&tx2, "bob", "starter").unwrap(),
            ReserveOutcome::OutOfStock
        );
    }

    #[test]
    fn materialize_is_idempotent_and_requires_reservation() {
        let svc = CoordinationService::new(MemStore::new());
        svc.bootstrap_stock(1).unwrap();
        let minter = minter();
        let tx = minter.mint();

        assert_eq!(
            svc.reserve_pack(&tx, "alice", "starter").unwrap(),
            ReserveOutcome::Reserved
        );
        let cards = vec![CardId::from("c1"), CardId::from("c2")];
        svc.materialize_pack(&tx, "alice", &cards).unwrap();
        assert_eq!(svc.inventory_of("alice").unwrap(), cards);

        // Second call is a no-op (marker present), not a double-add.
        svc.materialize_pack(&tx, "alice", &cards).unwrap();
        assert_eq!(svc.inventory_of("alice").unwrap(), cards);
    }

    #[test]
    fn verify_and_swap_rejects_missing_cards() {
        let svc = CoordinationService::new(MemStore::new());
        let minter = minter();
        let tx = minter.mint();

        assert_eq!(
            svc.verify_and_swap(&tx, "alice", &[CardId::from("c1")], "bob", &[CardId::from("c2")])
                .unwrap(),
            VerifyOutcome::MissingCards
        );
    }

    #[test]
    fn swap_moves_cards_both_ways() {
        let svc = CoordinationService::new(MemStore::new());
        svc.bootstrap_stock(10).unwrap();
        let minter = minter();
        let open_a = minter.mint();
        let open_b = minter.mint();
        svc.reserve_pack(&open_a, "alice", "starter").unwrap();
        svc.materialize_pack(&open_a, "alice", &[CardId::from("c1")])
            .unwrap();
        svc.reserve_pack(&open_b, "bob", "starter").unwrap();
        svc.materialize_pack(&open_b, "bob", &[CardId::from("c2")])
            .unwrap();

        let trade = minter.mint();
        assert_eq!(
            svc.verify_and_swap(
                &trade,
                "alice",
                &[CardId::from("c1")],
                "bob",
                &[CardId::from("c2")]
            )
            .unwrap(),
            VerifyOutcome::Prepared
        );
        svc.apply_swap(&trade).unwrap();
        assert_eq!(svc.inventory_of("alice").unwrap(), vec![CardId::from("c2")]);
        assert_eq!(svc.inventory_of("bob").unwrap(), vec![CardId::from("c1")]);

        // Idempotent re-application.
        svc.apply_swap(&trade).unwrap();
        assert_eq!(svc.inventory_of("alice").unwrap(), vec![CardId::from("c2")]);
    }

    #[test]
    fn update_tx_status_rejects_illegal_transitions() {
        use crate::types::{Payload, TxKind, TxStatus};
        let svc = CoordinationService::new(MemStore::new());
        let minter = minter();
        let tx = minter.mint();
        let record = TransactionRecord::new(
            tx.clone(),
            TxKind::OpenPack,
            PeerId::from("norte"),
            vec![PeerId::from("norte")],
            Payload::OpenPack(crate::types::OpenPackPayload {
                player_id: "alice".into(),
                pack_template_id: "starter".into(),
            }),
            0,
        );
        svc.log_tx(&record).unwrap();
        svc.update_tx_status(&tx, TxStatus::GlobalCommit).unwrap();
        let err = svc.update_tx_status(&tx, TxStatus::GlobalAbort).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }
}
