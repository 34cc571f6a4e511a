//! Control RPC transport: a small request/reply protocol over TCP.
//! One `Server` accepts connections and spawns a task per connection; each
//! task reads a length-prefixed [`ControlRequest`], hands it to a
//! [`ControlHandler`], and writes back a length-prefixed [`ControlResponse`].
//! Node addresses resolve through [`RoutingTable`] rather than a fixed
//! single address.

pub mod routing;
pub mod wire;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use crate::error::{HermesError, Result};
use routing::RoutingTable;
use wire::{ControlRequest, ControlResponse};

const MAX_CONCURRENT_CONNECTIONS: usize = 10_000;
/// 1 MiB; bounds metadata calls since blob read/write bodies also ride the
/// control connection as part of a `ControlRequest`.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Implemented by [`crate::service::Service`] so `rpc` never depends on it
/// directly; the server only needs something that turns a request into a
/// reply.
pub trait ControlHandler: Send + Sync {
    fn handle(&self, req: ControlRequest) -> ControlResponse;
}

pub struct Server {
    handler: Arc<dyn ControlHandler>,
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(handler: Arc<dyn ControlHandler>) -> Self {
        Self { handler, active_connections: Arc::new(AtomicUsize::new(0)) }
    }

    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| HermesError::Io { target: bind_addr.to_string(), detail: e.to_string() })?;
        debug!(addr = bind_addr, "control rpc listening");

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if self.active_connections.load(Ordering::Relaxed) >= MAX_CONCURRENT_CONNECTIONS {
                warn!(peer = %peer, "rejecting connection, at capacity");
                continue;
            }

            let handler = self.handler.clone();
            let active = self.active_connections.clone();
            active.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, handler).await {
                    debug!(peer = %peer, error = %e, "connection closed");
                }
                active.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }
}

async fn handle_connection(mut socket: TcpStream, handler: Arc<dyn ControlHandler>) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 4];
        match socket.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(_) => return Ok(()), // peer closed
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_REQUEST_SIZE {
            return Err(HermesError::InvalidArgument(format!("request of {len} bytes exceeds limit")));
        }
        let mut body = vec![0u8; len];
        socket
            .read_exact(&mut body)
            .await
            .map_err(|e| HermesError::Io { target: "control socket".into(), detail: e.to_string() })?;

        let (req, _): (ControlRequest, usize) =
            bincode::serde::decode_from_slice(&body, bincode::config::standard())
                .map_err(|e| HermesError::InvalidArgument(format!("malformed request: {e}")))?;

        let response = handler.handle(req);
        let encoded = bincode::serde::encode_to_vec(&response, bincode::config::standard())
            .map_err(|e| HermesError::InvalidArgument(format!("encode failed: {e}")))?;

        socket
            .write_all(&(encoded.len() as u32).to_le_bytes())
            .await
            .map_err(|e| HermesError::Io { target: "control socket".into(), detail: e.to_string() })?;
        socket
            .write_all(&encoded)
            .await
            .map_err(|e| HermesError::Io { target: "control socket".into(), detail: e.to_string() })?;
    }
}

/// Client-side single-shot call helper: dials the node owning `node_id`,
/// sends one request, reads one reply, and closes the connection. Control
/// traffic is low-rate enough (one call per metadata operation, never per
/// buffer) that connection reuse is not worth the complexity.
pub struct Client {
    routes: Arc<RoutingTable>,
    timeout: Duration,
}

impl Client {
    pub fn new(routes: Arc<RoutingTable>, timeout: Duration) -> Self {
        Self { routes, timeout }
    }

    pub async fn call(&self, node_id: u32, req: ControlRequest) -> Result<ControlResponse> {
        let addr = self.routes.resolve(node_id)?;
        let connect = TcpStream::connect(addr.to_socket_string());
        let mut socket = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| HermesError::RpcTimeout(node_id))?
            .map_err(|_| HermesError::RpcUnreachable(node_id))?;

        let encoded = bincode::serde::encode_to_vec(&req, bincode::config::standard())
            .map_err(|e| HermesError::InvalidArgument(format!("encode failed: {e}")))?;
        let write = async {
            socket.write_all(&(encoded.len() as u32).to_le_bytes()).await?;
            socket.write_all(&encoded).await
        };
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| HermesError::RpcTimeout(node_id))?
            .map_err(|e| HermesError::Io { target: "control socket".into(), detail: e.to_string() })?;

        let read = async {
            let mut len_buf = [0u8; 4];
            socket.read_exact(&mut len_buf).await?;
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            socket.read_exact(&mut body).await?;
            Ok::<_, std::io::Error>(body)
        };
        let body = tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| HermesError::RpcTimeout(node_id))?
            .map_err(|e| HermesError::Io { target: "control socket".into(), detail: e.to_string() })?;

        let (resp, _): (ControlResponse, usize) =
            bincode::serde::decode_from_slice(&body, bincode::config::standard()).map_err(|e| {
                error!(node_id, error = %e, "malformed reply");
                HermesError::RpcRemoteAbort(e.to_string())
            })?;
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoHandler {
        calls: Mutex<Vec<String>>,
    }

    impl ControlHandler for EchoHandler {
        fn handle(&self, req: ControlRequest) -> ControlResponse {
            match req {
                ControlRequest::Ping => {
                    self.calls.lock().unwrap().push("ping".into());
                    ControlResponse::Pong
                }
                _ => ControlResponse::Err("unsupported".into()),
            }
        }
    }

    #[tokio::test]
    async fn ping_roundtrips_over_tcp() {
        let handler = Arc::new(EchoHandler { calls: Mutex::new(Vec::new()) });
        let server = Server::new(handler.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let bind_addr = addr.to_string();
        let server_addr = bind_addr.clone();
        tokio::spawn(async move {
            let _ = server.run(&server_addr).await;
        });
        // Give the listener a moment to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let routes = Arc::new(RoutingTable::new());
        let (host, port) = bind_addr.split_once(':').unwrap();
        routes.set_node(0, routing::NodeAddress { host: host.to_string(), port: port.parse().unwrap() });
        let client = Client::new(routes, Duration::from_secs(2));
        let resp = client.call(0, ControlRequest::Ping).await.unwrap();
        assert!(matches!(resp, ControlResponse::Pong));
        assert_eq!(handler.calls.lock().unwrap().len(), 1);
    }
}
