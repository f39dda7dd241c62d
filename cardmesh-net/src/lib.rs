mod http;
mod loopback;
mod msg;
mod server;
mod transport;

pub use http::HttpTransport;
pub use loopback::LoopbackTransport;
pub use msg::{
    DecideRequest, DecideResponse, PrepareRequest, PrepareResponse, StatusRequest, StatusResponse,
};
pub use server::RpcServer;
pub use transport::{peer_unavailable, RpcHandler, Transport};
