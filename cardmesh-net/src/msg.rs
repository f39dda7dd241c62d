// The three inter-peer RPCs of spec.md section 6. Every call carries
// sender id, transaction id, and a monotonically assigned sequence
// number (generalizing the teacher's `Msg` envelope, which carried
// `src`/`dst`/`txn_time`/`msg_time`/`sequence`/`response` around a
// single `SpecificMsg` payload field).

use cardmesh_base::{PeerId, TxId};
use cardmesh_store::{AbortReason, Decision, Payload, TxKind, TxStatus, Vote};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub sender: PeerId,
    pub tx_id: TxId,
    pub sequence: i64,
    pub coordinator: PeerId,
    pub participants: Vec<PeerId>,
    pub payload: Payload,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub vote: Vote,
    pub reason: Option<AbortReason>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecideRequest {
    pub sender: PeerId,
    pub tx_id: TxId,
    pub sequence: i64,
    pub decision: Decision,
    pub kind: TxKind,
    pub payload: Payload,
    pub participants: Vec<PeerId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecideResponse {
    pub ack: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusRequest {
    pub tx_id: TxId,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Option<TxStatus>,
    pub vote: Option<Vote>,
    pub decision: Option<Decision>,
}

impl StatusResponse {
    pub fn unknown() -> Self {
        StatusResponse::default()
    }
}
