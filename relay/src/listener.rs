//! Per-tenant request listener (spec.md §4.7, C7).
//!
//! Generalizes the inline `asyncio.start_server(...)` callback in
//! `original_source/src/server.py`'s `Server.handle_request_connection`
//! into an owned struct so a `ControlSession` can cancel its accept loop
//! explicitly on teardown (spec.md §5 "Cancellation").

use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use subway_shared::frame::write_frame;
use subway_shared::protocol::Message;

/// The write half of a control socket, shared between the listener (which
/// writes `open{id}`) and the owning session (which writes the final
/// `close`) — framing requires a single writer at a time (spec.md §4.1).
pub type ControlWriter = Arc<Mutex<tokio::io::WriteHalf<TcpStream>>>;

/// Sockets accepted on a tenant's request listener, parked by id until the
/// matching `accept{id}` arrives on a fresh data connection (spec.md §3).
pub type ParkedRequests = Arc<DashMap<String, TcpStream>>;

/// A per-tenant TCP listener that accepts public-origin data connections
/// (in practice: the reverse proxy's own loopback connections to this
/// tenant's upstream) and queues them for dispatch via `open{id}`.
pub struct RequestListener {
    pub local_port: u16,
    accept_task: JoinHandle<()>,
}

impl RequestListener {
    /// Bind an ephemeral loopback port and start accepting connections.
    pub async fn spawn(
        bind_host: &str,
        parked: ParkedRequests,
        control_writer: ControlWriter,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((bind_host, 0)).await?;
        let local_port = listener.local_addr()?.port();

        let accept_task = tokio::spawn(async move {
            loop {
                let (socket, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::debug!("request listener: accept failed: {e}");
                        break;
                    }
                };

                let id = generate_request_id();
                tracing::debug!(%id, %peer, "request listener: parked new connection");
                parked.insert(id.clone(), socket);

                // Writing here, while holding the lock, is what provides
                // the spec's backpressure guarantee: if the client has
                // stopped reading its control channel, this write blocks,
                // which blocks the next `accept()` too (spec.md §4.5).
                let mut writer = control_writer.lock().await;
                if let Err(e) = write_frame(&mut *writer, &Message::open(id.clone())).await {
                    tracing::debug!("request listener: failed to notify open{{{id}}}: {e}");
                    parked.remove(&id);
                    break;
                }
            }
        });

        Ok(Self {
            local_port,
            accept_task,
        })
    }

    /// Cancel the accept loop; further connection attempts are refused by
    /// the OS once the underlying socket is dropped with the task.
    pub fn close(&self) {
        self.accept_task.abort();
    }
}

impl Drop for RequestListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Generate a request id with enough entropy to be unique across all live
/// requests (spec.md §3 invariant 1, §5 "id uniqueness").
fn generate_request_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream as TokioTcpStream;

    #[tokio::test]
    async fn accepted_connections_are_parked_and_announced() {
        let (control_client, control_server) = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
            let client = TokioTcpStream::connect(addr).await.unwrap();
            (client, accept.await.unwrap())
        };
        let (_control_read, control_write) = tokio::io::split(control_server);
        let control_writer: ControlWriter = Arc::new(Mutex::new(control_write));
        let parked: ParkedRequests = Arc::new(DashMap::new());

        let request_listener =
            RequestListener::spawn("127.0.0.1", parked.clone(), control_writer)
                .await
                .unwrap();

        let mut upstream_conn = TokioTcpStream::connect(("127.0.0.1", request_listener.local_port))
            .await
            .unwrap();
        upstream_conn.write_all(b"ping").await.unwrap();

        // Read the open{id} frame the listener wrote on the control socket.
        let mut control_read = {
            let listener2 = control_client;
            listener2
        };
        let msg = subway_shared::frame::read_frame(&mut control_read)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.message_type, subway_shared::protocol::MessageType::Open);
        let id = msg.id.unwrap();
        assert!(parked.contains_key(&id));
    }
}
