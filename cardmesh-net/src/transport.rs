// Peer Transport: synchronous request/response RPC between peers.
// The `Transport` trait is transport-agnostic by design (spec.md
// section 4.2 calls it "HTTP/JSON or equivalent - the core cares only
// about the semantic"); `LoopbackTransport` and `HttpTransport` are
// its two implementations.

use std::time::Duration;

use cardmesh_base::{kind_err, ErrorKind, PeerId, Result};

use crate::msg::{DecideRequest, DecideResponse, PrepareRequest, PrepareResponse, StatusRequest, StatusResponse};

pub trait Transport: Send + Sync {
    fn prepare(&self, peer: &PeerId, req: &PrepareRequest, deadline: Duration) -> Result<PrepareResponse>;
    fn decide(&self, peer: &PeerId, req: &DecideRequest, deadline: Duration) -> Result<DecideResponse>;
    fn status(&self, peer: &PeerId, req: &StatusRequest, deadline: Duration) -> Result<StatusResponse>;
}

/// What a participant implements to answer inbound RPCs, wired up by
/// whatever `Transport` delivers the request (loopback call or real
/// HTTP server handler).
pub trait RpcHandler: Send + Sync {
    fn handle_prepare(&self, req: PrepareRequest) -> Result<PrepareResponse>;
    fn handle_decide(&self, req: DecideRequest) -> Result<DecideResponse>;
    fn handle_status(&self, req: StatusRequest) -> Result<StatusResponse>;
}

pub fn peer_unavailable(msg: impl Into<std::borrow::Cow<'static, str>>) -> cardmesh_base::Error {
    kind_err(ErrorKind::PeerUnavailable, msg)
}
