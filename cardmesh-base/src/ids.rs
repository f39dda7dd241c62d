// Ubiquitous identifiers shared by every other crate: the peer id, the
// transaction id, and the local clock used to mint the latter.
//
// TxId generation follows the same shape as a Lamport-style realm
// timestamp: a millisecond wall-clock reading, broken by the minting
// peer's id, broken again by a per-peer monotonic counter. Two peers
// can never mint the same id, and ids mostly sort in wall-clock order
// (clock skew only affects latency, never correctness, per the
// protocol notes this is lifted from).

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TxId {
    millis: i64,
    peer: String,
    event: i64,
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.millis, self.peer, self.event)
    }
}

/// Mints unique, time-ordered, sender-qualified transaction ids for
/// one peer. Cheap to clone; the counter is shared.
#[derive(Clone)]
pub struct TxIdMinter {
    peer: PeerId,
    counter: std::sync::Arc<AtomicI64>,
}

impl TxIdMinter {
    pub fn new(peer: PeerId) -> Self {
        TxIdMinter {
            peer,
            counter: std::sync::Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn mint(&self) -> TxId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        let event = self.counter.fetch_add(1, Ordering::Relaxed);
        TxId {
            millis,
            peer: self.peer.0.clone(),
            event,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mints_unique_ascending_ids() {
        let minter = TxIdMinter::new(PeerId::from("norte"));
        let a = minter.mint();
        let b = minter.mint();
        assert_ne!(a, b);
        assert!(b > a || b.millis == a.millis);
    }

    #[test]
    fn different_peers_never_collide() {
        let m1 = TxIdMinter::new(PeerId::from("norte"));
        let m2 = TxIdMinter::new(PeerId::from("sul"));
        let a = m1.mint();
        let b = m2.mint();
        assert_ne!(a, b);
    }
}
