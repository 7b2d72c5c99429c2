//! Control-channel session state machine (spec.md §5, C5).
//!
//! States: `Init -> AwaitHello -> Active -> Closing -> Dead`. Generalizes
//! `original_source/src/server.py`'s `Server.handle_control_connection`
//! (one coroutine per control socket) into an explicit struct so each state
//! transition and its side effects are named, matching the teacher's
//! `relay/src/tunnel.rs` style of modeling a connection's lifecycle as an
//! owned type rather than a single long function.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};

use subway_shared::frame::{read_frame, write_frame};
use subway_shared::protocol::{Message, MessageType};

use crate::listener::{ParkedRequests, RequestListener};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitHello,
    Active,
    Closing,
    Dead,
}

/// Per-subdomain wakeups the registry's cleanup sweep uses to tell a live
/// `ControlSession` that its entry was just evicted (spec.md §4.5, §8
/// scenario 5).
pub type EvictionNotifiers = Arc<DashMap<String, Arc<Notify>>>;

/// Everything a single client's control connection needs for its lifetime.
pub struct ControlSession {
    registry: Arc<Registry>,
    parked: ParkedRequests,
    bind_host: String,
    notifiers: EvictionNotifiers,
    state: State,
}

impl ControlSession {
    pub fn new(
        registry: Arc<Registry>,
        parked: ParkedRequests,
        bind_host: String,
        notifiers: EvictionNotifiers,
    ) -> Self {
        Self {
            registry,
            parked,
            bind_host,
            notifiers,
            state: State::AwaitHello,
        }
    }

    /// Drive one control connection end to end: read `hello`, register the
    /// subdomain, reply, spawn the request listener, then block until the
    /// control socket closes (spec.md §5).
    ///
    /// `first` is the `hello` frame already read off `socket` by the
    /// dispatcher that told a plain accept apart from a data-channel
    /// `accept{id}` reconnection (spec.md §4.5).
    pub async fn run(mut self, socket: TcpStream, first: Message) {
        debug_assert_eq!(self.state, State::AwaitHello);

        if first.message_type != MessageType::Hello {
            tracing::debug!("control session: expected hello, got {:?}", first.message_type);
            return;
        }

        let (mut read_half, write_half) = tokio::io::split(socket);
        let writer: Arc<Mutex<tokio::io::WriteHalf<TcpStream>>> = Arc::new(Mutex::new(write_half));

        let port_listener = match RequestListener::spawn(
            &self.bind_host,
            self.parked.clone(),
            writer.clone(),
        )
        .await
        {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!("control session: failed to bind request listener: {e}");
                return;
            }
        };

        let (subdomain, endpoint) = self
            .registry
            .register(first.subdomain.clone(), port_listener.local_port)
            .await;
        tracing::info!(%subdomain, endpoint = %endpoint, "control session: tenant registered");

        {
            let mut w = writer.lock().await;
            if let Err(e) = write_frame(&mut *w, &Message::hello_reply(endpoint)).await {
                tracing::debug!("control session: failed to send hello reply: {e}");
                self.registry.remove(&subdomain).await;
                return;
            }
        }

        self.state = State::Active;

        let evicted = Arc::new(Notify::new());
        self.notifiers.insert(subdomain.clone(), evicted.clone());

        // The client shouldn't send anything else on this socket — data
        // channels are separate connections (spec.md §3) — so the read arm
        // here only needs to notice when the control socket goes away. The
        // second arm fires when the registry's cleanup sweep expires this
        // subdomain out from under the session (spec.md §4.5 ACTIVE -> CLOSING
        // on eviction; §8 scenario 5).
        loop {
            tokio::select! {
                frame = read_frame(&mut read_half) => {
                    match frame {
                        Ok(Some(msg)) => {
                            tracing::debug!(?msg.message_type, "control session: unexpected frame on control channel");
                            if msg.message_type == MessageType::Close {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!("control session: control channel error: {e}");
                            break;
                        }
                    }
                }
                _ = evicted.notified() => {
                    tracing::info!(%subdomain, "control session: evicted by registry cleanup");
                    break;
                }
            }
        }

        self.state = State::Closing;
        port_listener.close();
        self.notifiers.remove(&subdomain);
        self.registry.remove(&subdomain).await;
        {
            let mut w = writer.lock().await;
            let _ = write_frame(&mut *w, &Message::close()).await;
        }
        self.state = State::Dead;
        tracing::info!(%subdomain, "control session: torn down");
    }
}

/// Dispatch a freshly accepted control-port connection: peek at its first
/// frame to tell a new control session (`hello`) apart from a data-channel
/// reconnection (`accept{id}`) — spec.md §4.5, "the transport IS the data
/// channel, identified by its first frame, with no separate handshake".
pub async fn dispatch(
    socket: TcpStream,
    registry: Arc<Registry>,
    parked: ParkedRequests,
    bind_host: String,
    notifiers: EvictionNotifiers,
) {
    let mut socket = socket;
    let first = match read_frame(&mut socket).await {
        Ok(Some(m)) => m,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!("dispatch: failed to read first frame: {e}");
            return;
        }
    };

    match first.message_type {
        MessageType::Hello => {
            ControlSession::new(registry, parked, bind_host, notifiers)
                .run(socket, first)
                .await;
        }
        MessageType::Accept => {
            let Some(id) = first.id else {
                tracing::debug!("dispatch: accept frame missing id");
                return;
            };
            match parked.remove(&id) {
                Some((_, parked_socket)) => {
                    tracing::debug!(%id, "dispatch: bridging data channel");
                    subway_shared::bridge::bridge(parked_socket, socket).await;
                }
                None => {
                    tracing::debug!(%id, "dispatch: accept for unknown or expired id");
                }
            }
        }
        other => {
            tracing::debug!("dispatch: unexpected first frame type {other:?}");
        }
    }
}

/// Accept loop for the control port: every connection is dispatched
/// independently so a new session doesn't block unrelated data-channel
/// reconnections (spec.md §4.5, §7 "a relay serves many tenants concurrently").
pub async fn serve(
    bind: String,
    control_port: u16,
    registry: Arc<Registry>,
    parked: ParkedRequests,
    notifiers: EvictionNotifiers,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((bind.as_str(), control_port)).await?;
    tracing::info!(%bind, %control_port, "relay: control listener up");

    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!(%peer, "relay: accepted control-port connection");
        let registry = registry.clone();
        let parked = parked.clone();
        let bind_host = bind.clone();
        let notifiers = notifiers.clone();
        tokio::spawn(dispatch(socket, registry, parked, bind_host, notifiers));
    }
}

/// Consume evicted-subdomain notifications from [`Registry::spawn_cleanup`]
/// and wake the owning `ControlSession`, driving it `Active -> Closing`: it
/// closes its request listener, deregisters, and sends a best-effort `close`
/// frame before the socket drops (spec.md §4.5, §8 scenario 5).
pub async fn watch_evictions(
    mut evicted: tokio::sync::mpsc::UnboundedReceiver<String>,
    notifiers: EvictionNotifiers,
) {
    while let Some(subdomain) = evicted.recv().await {
        tracing::info!(%subdomain, "relay: upstream expired and was evicted");
        if let Some((_, notify)) = notifiers.remove(&subdomain) {
            notify.notify_one();
        }
    }
}
