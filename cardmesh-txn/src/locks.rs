// Per-transaction serialization (spec.md section 5): "within a peer,
// per-tx_id operations are additionally serialized by a
// transaction-scoped lock to avoid double-application under duplicate
// RPCs", independent of and in addition to the Store's own CAS.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cardmesh_base::TxId;

#[derive(Default)]
pub struct TxLocks {
    locks: Mutex<HashMap<TxId, Arc<Mutex<()>>>>,
}

impl TxLocks {
    pub fn new() -> Self {
        TxLocks::default()
    }

    fn handle(&self, tx_id: &TxId) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap();
        map.entry(tx_id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Hold this transaction's lock for the duration of the guard.
    /// Callers must drop the guard before attempting a second
    /// acquisition on the same thread (no reentrancy).
    pub fn acquire(&self, tx_id: &TxId) -> TxLockGuard {
        let handle = self.handle(tx_id);
        TxLockGuard { handle }
    }
}

pub struct TxLockGuard {
    handle: Arc<Mutex<()>>,
}

impl TxLockGuard {
    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_tx_id_shares_one_lock() {
        let locks = TxLocks::new();
        let tx_id = cardmesh_base::TxIdMinter::new(cardmesh_base::PeerId::from("norte")).mint();
        let guard_a = locks.acquire(&tx_id);
        let _held = guard_a.hold();
        let guard_b = locks.acquire(&tx_id);
        assert!(guard_b.handle.try_lock().is_err());
    }
}
