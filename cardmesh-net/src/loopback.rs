// In-process transport: every peer's handler is wired up directly,
// so a multi-peer scenario can run inside one test process with
// deterministic fault injection (`set_down`) instead of real sockets
// and real flakiness. This generalizes the teacher's `Node`, which
// moved messages through in-memory `VecDeque`s rather than a socket.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cardmesh_base::{PeerId, Result};

use crate::msg::{DecideRequest, DecideResponse, PrepareRequest, PrepareResponse, StatusRequest, StatusResponse};
use crate::transport::{peer_unavailable, RpcHandler, Transport};

#[derive(Default)]
pub struct LoopbackTransport {
    handlers: Mutex<HashMap<PeerId, Arc<dyn RpcHandler>>>,
    down: Mutex<HashSet<PeerId>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport::default()
    }

    pub fn register(&self, peer: PeerId, handler: Arc<dyn RpcHandler>) {
        self.handlers.lock().unwrap().insert(peer, handler);
    }

    /// Simulate a peer being unreachable (coordinator crash, network
    /// partition) until cleared.
    pub fn set_down(&self, peer: PeerId, down: bool) {
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(peer);
        } else {
            set.remove(&peer);
        }
    }

    fn resolve(&self, peer: &PeerId) -> Result<Arc<dyn RpcHandler>> {
        if self.down.lock().unwrap().contains(peer) {
            return Err(peer_unavailable(format!("peer {peer} is simulated down")));
        }
        self.handlers
            .lock()
            .unwrap()
            .get(peer)
            .cloned()
            .ok_or_else(|| peer_unavailable(format!("no handler registered for peer {peer}")))
    }
}

impl Transport for LoopbackTransport {
    fn prepare(&self, peer: &PeerId, req: &PrepareRequest, _deadline: Duration) -> Result<PrepareResponse> {
        self.resolve(peer)?.handle_prepare(req.clone())
    }

    fn decide(&self, peer: &PeerId, req: &DecideRequest, _deadline: Duration) -> Result<DecideResponse> {
        self.resolve(peer)?.handle_decide(req.clone())
    }

    fn status(&self, peer: &PeerId, req: &StatusRequest, _deadline: Duration) -> Result<StatusResponse> {
        self.resolve(peer)?.handle_status(req.clone())
    }
}
