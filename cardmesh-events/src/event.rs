// Domain events emitted at the points spec.md section 9 calls out:
// a transaction reaching a global decision, and a transaction
// finishing its decide fan-out. These are the boundary to whatever
// Pub/Sub system a deployment owns; this crate only defines the shape
// and a logging fallback.

use cardmesh_base::TxId;
use cardmesh_store::{Decision, TxKind};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    TransactionDecided {
        tx_id: TxId,
        kind: TxKind,
        decision: Decision,
    },
    TransactionCompleted {
        tx_id: TxId,
    },
}
