mod dispatch;
mod engine;
mod locks;
mod recovery;

pub use dispatch::{ops_for, OpenPackOps, ParticipantOps, TradeCardsOps};
pub use engine::{EngineTimeouts, TransactionEngine};
pub use locks::TxLocks;
pub use recovery::RecoverySweeper;
