// Data model types from the shared state store: pack stock, player
// inventories, cards, and the transaction log entry that the
// Coordination Service and Transaction Engine both read and write.
//
// Every type here is `Serialize`/`Deserialize` because it either
// crosses the wire (as part of a PREPARE/DECIDE payload) or is
// durable (as a value in the store).

use cardmesh_base::{DoubleBitmap256, PeerId, TxId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Rank {
    Rock,
    Paper,
    Scissors,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Legendary,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CardId(pub String);

impl From<&str> for CardId {
    fn from(s: &str) -> Self {
        CardId(s.to_string())
    }
}

/// Reference data describing one card. Static, not managed by the
/// core; templates resolve a pack into a deterministic set of these.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CardInfo {
    pub id: CardId,
    pub rank: Rank,
    pub rarity: Rarity,
}

/// A deterministic production rule: opening a pack of this template
/// always yields the same card ids. The spec leaves pack contents
/// unspecified beyond "a deterministic set of cards per template";
/// fixing that here as a static table resolved by id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackTemplate {
    pub id: String,
    pub cards: Vec<CardId>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum TxKind {
    OpenPack,
    TradeCards,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OpenPackPayload {
    pub player_id: String,
    pub pack_template_id: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TradeCardsPayload {
    pub player_a: String,
    pub cards_a_out: Vec<CardId>,
    pub player_b: String,
    pub cards_b_out: Vec<CardId>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    OpenPack(OpenPackPayload),
    TradeCards(TradeCardsPayload),
}

impl Payload {
    pub fn kind(&self) -> TxKind {
        match self {
            Payload::OpenPack(_) => TxKind::OpenPack,
            Payload::TradeCards(_) => TxKind::TradeCards,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Vote {
    Commit,
    Abort,
}

/// Business-level reasons a vote or a global decision can land on
/// ABORT, surfaced to callers in the PREPARE `reason` field per spec.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AbortReason {
    OutOfStock,
    MissingCards,
    Conflict,
    PeerUnavailable,
    StoreUnavailable,
    Timeout,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    Commit,
    Abort(AbortReason),
}

/// The transaction's position in the state machine of spec.md
/// section 4.3. Transitions are monotonic (invariant I4); see
/// `TransactionRecord::can_transition_to`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TxStatus {
    Preparing,
    VotedCommit,
    VotedAbort,
    GlobalCommit,
    GlobalAbort,
    Completed,
}

impl TxStatus {
    /// Whether advancing from `self` to `next` is a legal edge of the
    /// state machine. Self-transitions are always legal (idempotent
    /// re-application of the same status).
    pub fn can_advance_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Preparing, VotedCommit)
                | (Preparing, VotedAbort)
                | (Preparing, GlobalCommit)
                | (Preparing, GlobalAbort)
                | (VotedCommit, GlobalCommit)
                | (VotedCommit, GlobalAbort)
                | (VotedAbort, GlobalAbort)
                | (GlobalCommit, Completed)
                | (GlobalAbort, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Completed)
    }
}

/// Per-participant commit/abort vote, packed two bits per peer
/// (00 = no vote yet, 01 = commit, 10 = abort) so a single 256-peer
/// registry's worth of votes fits in 64 bytes.
pub type VoteMap = DoubleBitmap256;

pub const VOTE_NONE: u8 = 0;
pub const VOTE_COMMIT: u8 = 1;
pub const VOTE_ABORT: u8 = 2;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: TxId,
    pub kind: TxKind,
    pub coordinator: PeerId,
    pub participants: Vec<PeerId>,
    pub payload: Payload,
    pub status: TxStatus,
    pub votes: VoteMap,
    /// Participants (by index into `participants`) that have
    /// acknowledged the DECIDE for this transaction.
    pub acks: cardmesh_base::Bitmap256,
    /// Milliseconds since the epoch of the last status change, used
    /// by the recovery sweeper to find stalled transactions.
    pub last_update_millis: i64,
    /// The global decision once reached, surfaced to STATUS callers.
    /// `None` until the record advances to GLOBAL_COMMIT/GLOBAL_ABORT.
    pub decision: Option<Decision>,
}

impl TransactionRecord {
    pub fn new(
        tx_id: TxId,
        kind: TxKind,
        coordinator: PeerId,
        participants: Vec<PeerId>,
        payload: Payload,
        now_millis: i64,
    ) -> Self {
        TransactionRecord {
            tx_id,
            kind,
            coordinator,
            participants,
            payload,
            status: TxStatus::Preparing,
            votes: VoteMap::new(),
            acks: cardmesh_base::Bitmap256::new(),
            last_update_millis: now_millis,
            decision: None,
        }
    }

    pub fn vote_of(&self, peer: &PeerId) -> Option<Vote> {
        self.participant_index(peer).map(|i| match self.votes.get(i) {
            VOTE_COMMIT => Vote::Commit,
            _ => Vote::Abort,
        })
    }

    pub fn participant_index(&self, peer: &PeerId) -> Option<u8> {
        self.participants
            .iter()
            .position(|p| p == peer)
            .map(|i| i as u8)
    }

    pub fn record_vote(&mut self, peer: &PeerId, vote: Vote) {
        if let Some(i) = self.participant_index(peer) {
            self.votes
                .set(i, if vote == Vote::Commit { VOTE_COMMIT } else { VOTE_ABORT });
        }
    }

    pub fn all_voted_commit(&self) -> bool {
        self.participants
            .iter()
            .enumerate()
            .all(|(i, _)| self.votes.get(i as u8) == VOTE_COMMIT)
    }

    pub fn any_voted_abort(&self) -> bool {
        self.participants
            .iter()
            .enumerate()
            .any(|(i, _)| self.votes.get(i as u8) == VOTE_ABORT)
    }

    pub fn all_acked(&self) -> bool {
        self.participants
            .iter()
            .enumerate()
            .all(|(i, _)| self.acks.get(i as u8))
    }

    pub fn ack(&mut self, peer: &PeerId) {
        if let Some(i) = self.participant_index(peer) {
            self.acks.set(i, true);
        }
    }
}

/// A reservation marker binding one pack unit to a transaction id
/// between PREPARE and a terminal decision (invariant I6).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReservedPack {
    pub tx_id: TxId,
    pub player_id: String,
    pub pack_template_id: String,
}

/// A swap-intent marker produced by `verify_and_swap`, consumed by
/// `apply_swap` or released by `cancel_swap`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SwapIntent {
    pub tx_id: TxId,
    pub player_a: String,
    pub cards_a_out: Vec<CardId>,
    pub player_b: String,
    pub cards_b_out: Vec<CardId>,
}

pub type CardMultiset = Vec<CardId>;

pub fn contains_all(inventory: &CardMultiset, wanted: &[CardId]) -> bool {
    let mut remaining: Vec<&CardId> = inventory.iter().collect();
    for w in wanted {
        match remaining.iter().position(|c| *c == w) {
            Some(i) => {
                remaining.remove(i);
            }
            None => return false,
        }
    }
    true
}

pub fn remove_all(inventory: &mut CardMultiset, wanted: &[CardId]) {
    for w in wanted {
        if let Some(i) = inventory.iter().position(|c| c == w) {
            inventory.remove(i);
        }
    }
}
