// The "dynamically typed payload" re-architecture of spec.md section
// 9: polymorphism over {PREPARE-check, COMMIT-effect, ABORT-effect}
// is a small interface with exactly two implementations, selected
// once by `Payload::kind()` and then used uniformly by both the
// coordinator and participant code paths.

use cardmesh_base::{PeerId, Result, TxId};
use cardmesh_store::{
    AbortReason, CardId, Catalog, CoordinationService, OpenPackPayload, Payload, ReserveOutcome,
    Store, TradeCardsPayload, Vote, VerifyOutcome,
};

pub trait ParticipantOps<S: Store>: Send + Sync {
    /// The PREPARE-time check-and-reserve. Returns the vote to cast
    /// and, on ABORT, the business reason.
    fn prepare(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<(Vote, Option<AbortReason>)>;

    /// The COMMIT-time effect (materialize / apply swap).
    fn commit(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<()>;

    /// The ABORT-time rollback (release / cancel). Idempotent, and
    /// safe to call even when PREPARE never actually reserved
    /// anything (a failed CAS left nothing to roll back).
    fn abort(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<()>;
}

pub struct OpenPackOps {
    payload: OpenPackPayload,
    catalog: std::sync::Arc<Catalog>,
}

impl OpenPackOps {
    pub fn new(payload: OpenPackPayload, catalog: std::sync::Arc<Catalog>) -> Self {
        OpenPackOps { payload, catalog }
    }
}

impl<S: Store> ParticipantOps<S> for OpenPackOps {
    fn prepare(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<(Vote, Option<AbortReason>)> {
        match coord.reserve_pack(tx_id, &self.payload.player_id, &self.payload.pack_template_id)? {
            ReserveOutcome::Reserved => Ok((Vote::Commit, None)),
            ReserveOutcome::OutOfStock => Ok((Vote::Abort, Some(AbortReason::OutOfStock))),
            ReserveOutcome::Conflict => Ok((Vote::Abort, Some(AbortReason::Conflict))),
        }
    }

    fn commit(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<()> {
        let cards: Vec<CardId> = self
            .catalog
            .resolve(&self.payload.pack_template_id)
            .map(|t| t.cards.clone())
            .unwrap_or_default();
        coord.materialize_pack(tx_id, &self.payload.player_id, &cards)
    }

    fn abort(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<()> {
        coord.release_pack(tx_id)
    }
}

pub struct TradeCardsOps {
    payload: TradeCardsPayload,
}

impl TradeCardsOps {
    pub fn new(payload: TradeCardsPayload) -> Self {
        TradeCardsOps { payload }
    }
}

impl<S: Store> ParticipantOps<S> for TradeCardsOps {
    fn prepare(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<(Vote, Option<AbortReason>)> {
        let outcome = coord.verify_and_swap(
            tx_id,
            &self.payload.player_a,
            &self.payload.cards_a_out,
            &self.payload.player_b,
            &self.payload.cards_b_out,
        )?;
        match outcome {
            VerifyOutcome::Prepared => Ok((Vote::Commit, None)),
            VerifyOutcome::MissingCards => Ok((Vote::Abort, Some(AbortReason::MissingCards))),
            VerifyOutcome::Conflict => Ok((Vote::Abort, Some(AbortReason::Conflict))),
        }
    }

    fn commit(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<()> {
        coord.apply_swap(tx_id)
    }

    fn abort(&self, coord: &CoordinationService<S>, tx_id: &TxId) -> Result<()> {
        coord.cancel_swap(tx_id)
    }
}

pub fn ops_for<S: Store>(payload: &Payload, catalog: std::sync::Arc<Catalog>) -> Box<dyn ParticipantOps<S>> {
    match payload.clone() {
        Payload::OpenPack(p) => Box::new(OpenPackOps::new(p, catalog)),
        Payload::TradeCards(p) => Box::new(TradeCardsOps::new(p)),
    }
}

/// `AbortReason` a caller should attribute to a non-vote (timeout,
/// transport failure) when collecting PREPARE responses.
pub fn reason_for_unreachable(_peer: &PeerId) -> AbortReason {
    AbortReason::PeerUnavailable
}
