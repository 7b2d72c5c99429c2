//! Client tunnel agent (spec.md §5, C6).
//!
//! Dials the relay's control channel, requests a subdomain, and then
//! services `open{id}` notifications by dialing a fresh data connection and
//! bridging it to the exposed local service — the mirror image of the
//! relay's `session`/`listener` pair. Generalizes the teacher's
//! `run_http_tunnel` WebSocket loop in `main.rs` into a plain-TCP version of
//! the same `tokio::select!`-driven read loop.

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use subway_shared::frame::{read_frame, write_frame};
use subway_shared::protocol::{Message, MessageType};

use crate::config::ClientConfig;

/// Connect to the relay, register a tunnel, and service requests until the
/// relay closes the session or the process receives Ctrl-C.
pub async fn run(config: ClientConfig) -> Result<()> {
    let relay_addr = (config.relay_host.as_str(), config.relay_port);

    let mut control = TcpStream::connect(relay_addr)
        .await
        .with_context(|| format!("connecting to relay at {}:{}", config.relay_host, config.relay_port))?;

    write_frame(&mut control, &Message::hello(config.subdomain.clone()))
        .await
        .context("sending hello")?;

    let reply = read_frame(&mut control)
        .await
        .context("reading hello reply")?
        .ok_or_else(|| anyhow::anyhow!("relay closed the connection before replying"))?;

    if reply.message_type != MessageType::Hello {
        anyhow::bail!("expected a hello reply, got {:?}", reply.message_type);
    }
    let endpoint = reply
        .endpoint
        .ok_or_else(|| anyhow::anyhow!("hello reply missing endpoint"))?;

    info!(%endpoint, local_port = config.local_port, "tunnel active");
    println!("Forwarding {endpoint} -> http://localhost:{}", config.local_port);
    println!("Press Ctrl+C to stop the tunnel\n");

    loop {
        tokio::select! {
            frame = read_frame(&mut control) => {
                match frame {
                    Ok(Some(msg)) => {
                        if !handle_control_message(msg, &config).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("relay closed the control channel");
                        break;
                    }
                    Err(e) => {
                        error!("control channel error: {e}");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = write_frame(&mut control, &Message::close()).await;
                break;
            }
        }
    }

    Ok(())
}

/// Handle one frame read off the control channel. Returns `false` when the
/// session should end.
async fn handle_control_message(msg: Message, config: &ClientConfig) -> bool {
    match msg.message_type {
        MessageType::Open => {
            let Some(id) = msg.id else {
                warn!("open frame missing id, ignoring");
                return true;
            };
            let relay_host = config.relay_host.clone();
            let relay_port = config.relay_port;
            let local_port = config.local_port;
            tokio::spawn(async move {
                if let Err(e) = service_request(&relay_host, relay_port, local_port, id).await {
                    warn!("failed to service request: {e}");
                }
            });
            true
        }
        MessageType::Close => {
            info!("relay requested close");
            false
        }
        other => {
            warn!("unexpected frame on control channel: {other:?}");
            true
        }
    }
}

/// Open a new data connection for `id`, announce it with `accept{id}`, dial
/// the exposed local service, and bridge the two (spec.md §4.2, §4.6).
async fn service_request(relay_host: &str, relay_port: u16, local_port: u16, id: String) -> Result<()> {
    let mut data_conn = TcpStream::connect((relay_host, relay_port))
        .await
        .context("dialing data connection")?;
    write_frame(&mut data_conn, &Message::accept(id.clone()))
        .await
        .context("sending accept")?;

    let local_conn = TcpStream::connect(("127.0.0.1", local_port))
        .await
        .with_context(|| format!("connecting to local service on port {local_port}"))?;

    subway_shared::bridge::bridge(data_conn, local_conn).await;
    Ok(())
}
