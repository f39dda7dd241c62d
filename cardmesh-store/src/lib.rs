mod catalog;
mod coordination;
mod keys;
mod mem;
mod redb_store;
mod store;
mod types;

pub use catalog::Catalog;
pub use coordination::{CoordinationService, ReserveOutcome, VerifyOutcome};
pub use mem::MemStore;
pub use redb_store::RedbStore;
pub use store::{cas_retry, CasStep, Snapshot, Store, Write};
pub use types::{
    contains_all, remove_all, AbortReason, CardId, CardInfo, CardMultiset, Decision,
    OpenPackPayload, PackTemplate, Payload, Rank, Rarity, ReservedPack, SwapIntent,
    TradeCardsPayload, TransactionRecord, TxKind, TxStatus, Vote, VoteMap, VOTE_ABORT,
    VOTE_COMMIT, VOTE_NONE,
};
