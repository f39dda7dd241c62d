// A small hand-rolled HTTP/1.1 server: one thread per connection,
// just enough request parsing to read a method/path line, a
// Content-Length header, and a JSON body. Pairs with `HttpTransport`
// on the sending side. Generalizes the teacher's own very thin
// `IOQueues`-based request loop, but over real sockets.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::msg::{DecideRequest, PrepareRequest, StatusRequest};
use crate::transport::RpcHandler;

pub struct RpcServer {
    handler: Arc<dyn RpcHandler>,
}

impl RpcServer {
    pub fn new(handler: Arc<dyn RpcHandler>) -> Self {
        RpcServer { handler }
    }

    /// Bind and serve forever, spawning one thread per accepted
    /// connection. Returns only on a listener-level error.
    pub fn serve(self: Arc<Self>, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        debug!(target: "cardmesh", %addr, "rpc server listening");
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "cardmesh", error = %e, "accept failed");
                    continue;
                }
            };
            let this = Arc::clone(&self);
            std::thread::spawn(move || {
                if let Err(e) = this.handle_connection(stream) {
                    warn!(target: "cardmesh", error = %e, "connection error");
                }
            });
        }
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;
        if request_line.is_empty() {
            return Ok(());
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();

        let mut content_length: usize = 0;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header)?;
            if header == "\r\n" || header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body)?;

        let mut stream = stream;
        if method != "POST" {
            return write_response(&mut stream, 405, b"method not allowed");
        }
        let (status, payload) = self.dispatch(&path, &body);
        write_response(&mut stream, status, &payload)
    }

    fn dispatch(&self, path: &str, body: &[u8]) -> (u16, Vec<u8>) {
        match path {
            "/rpc/prepare" => self.run(body, |req: PrepareRequest| self.handler.handle_prepare(req)),
            "/rpc/decide" => self.run(body, |req: DecideRequest| self.handler.handle_decide(req)),
            "/rpc/status" => self.run(body, |req: StatusRequest| self.handler.handle_status(req)),
            _ => (404, b"not found".to_vec()),
        }
    }

    fn run<Req, Resp>(&self, body: &[u8], f: impl FnOnce(Req) -> cardmesh_base::Result<Resp>) -> (u16, Vec<u8>)
    where
        Req: serde::de::DeserializeOwned,
        Resp: serde::Serialize,
    {
        let req: Req = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "cardmesh", error = %e, "malformed rpc request body");
                return (400, b"malformed request".to_vec());
            }
        };
        match f(req) {
            Ok(resp) => match serde_json::to_vec(&resp) {
                Ok(bytes) => (200, bytes),
                Err(e) => {
                    error!(target: "cardmesh", error = %e, "failed to encode rpc response");
                    (500, b"internal error".to_vec())
                }
            },
            Err(e) => {
                warn!(target: "cardmesh", error = %e, "rpc handler failed");
                (500, e.to_string().into_bytes())
            }
        }
    }
}

fn write_response(stream: &mut TcpStream, status: u16, body: &[u8]) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    };
    write!(
        stream,
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()
}
