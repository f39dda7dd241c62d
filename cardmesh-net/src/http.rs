// Real peer transport: one small HTTP/JSON client per peer, built on
// `ureq` (a synchronous client, matching spec.md's "synchronous
// request/response RPC" literally, with no async runtime anywhere in
// the workspace).

use std::collections::HashMap;
use std::time::Duration;

use cardmesh_base::{PeerId, Result};

use crate::msg::{DecideRequest, DecideResponse, PrepareRequest, PrepareResponse, StatusRequest, StatusResponse};
use crate::transport::{peer_unavailable, Transport};

pub struct HttpTransport {
    addresses: HashMap<PeerId, String>,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(addresses: HashMap<PeerId, String>) -> Self {
        HttpTransport {
            addresses,
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    fn base_url(&self, peer: &PeerId) -> Result<&str> {
        self.addresses
            .get(peer)
            .map(|s| s.as_str())
            .ok_or_else(|| peer_unavailable(format!("no address configured for peer {peer}")))
    }

    fn post<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        peer: &PeerId,
        path: &str,
        req: &Req,
        deadline: Duration,
    ) -> Result<Resp> {
        let url = format!("{}{path}", self.base_url(peer)?);
        let response = self
            .agent
            .post(&url)
            .timeout(deadline)
            .send_json(req)
            .map_err(|e| peer_unavailable(format!("{peer}: {e}")))?;
        response
            .into_json::<Resp>()
            .map_err(|e| peer_unavailable(format!("{peer}: malformed response: {e}")))
    }
}

impl Transport for HttpTransport {
    fn prepare(&self, peer: &PeerId, req: &PrepareRequest, deadline: Duration) -> Result<PrepareResponse> {
        self.post(peer, "/rpc/prepare", req, deadline)
    }

    fn decide(&self, peer: &PeerId, req: &DecideRequest, deadline: Duration) -> Result<DecideResponse> {
        self.post(peer, "/rpc/decide", req, deadline)
    }

    fn status(&self, peer: &PeerId, req: &StatusRequest, deadline: Duration) -> Result<StatusResponse> {
        self.post(peer, "/rpc/status", req, deadline)
    }
}
