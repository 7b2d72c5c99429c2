//! Entry point for `subway-relay` (spec.md §1, §7).
//!
//! Wires the control-channel listener (C5), the registry's cleanup sweep
//! (C3), and the public HTTP(S) reverse proxy (C4) into one process, in the
//! teacher's `tokio::main` + `tracing_subscriber::fmt()` style.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dashmap::DashMap;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use subway_relay::config::RelayConfig;
use subway_relay::registry::Registry;
use subway_relay::{proxy, session, tls};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("subway_relay=info")),
        )
        .init();

    let config = RelayConfig::parse();
    config.validate()?;

    let scheme = if config.tls { "https" } else { "http" };
    let registry = Arc::new(Registry::new(
        Duration::from_secs(config.expire_time),
        config.domain.clone(),
        scheme.to_string(),
    ));
    let parked = Arc::new(DashMap::new());
    let notifiers = Arc::new(DashMap::new());

    let (_cleanup_task, evicted_rx) = registry
        .clone()
        .spawn_cleanup(Duration::from_secs(config.cleanup_interval));
    tokio::spawn(session::watch_evictions(evicted_rx, notifiers.clone()));

    let control_task = tokio::spawn(session::serve(
        config.bind.clone(),
        config.control_port,
        registry.clone(),
        parked.clone(),
        notifiers,
    ));

    let proxy_state = proxy::ProxyState::new(registry.clone(), config.domain.clone(), config.behind_proxy);
    let plain_task = tokio::spawn(run_plain_proxy(
        config.bind.clone(),
        config.proxy_port_plain,
        proxy_state.clone(),
    ));

    let tls_task = if config.tls {
        let cert_path = config.cert_path.clone().expect("validated by RelayConfig::validate");
        let key_path = config.key_path.clone().expect("validated by RelayConfig::validate");
        let acceptor = tls::load_acceptor(&cert_path, &key_path)?;
        Some(tokio::spawn(run_tls_proxy(
            config.bind.clone(),
            config.proxy_port_tls,
            proxy_state,
            acceptor,
        )))
    } else {
        None
    };

    info!(
        domain = %config.domain,
        control_port = config.control_port,
        proxy_port_plain = config.proxy_port_plain,
        tls = config.tls,
        "relay: started"
    );

    tokio::select! {
        res = control_task => {
            match res {
                Ok(Err(e)) => error!("relay: control listener failed: {e}"),
                Err(e) => error!("relay: control listener task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
        res = plain_task => {
            match res {
                Ok(Err(e)) => error!("relay: plain proxy failed: {e}"),
                Err(e) => error!("relay: plain proxy task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
    }

    if let Some(task) = tls_task {
        task.abort();
    }

    Ok(())
}

async fn run_plain_proxy(bind: String, port: u16, state: proxy::ProxyState) -> anyhow::Result<()> {
    let listener = TcpListener::bind((bind.as_str(), port)).await?;
    info!(%bind, %port, "relay: plain HTTP proxy listening");
    serve_http(listener, state, None).await
}

async fn run_tls_proxy(
    bind: String,
    port: u16,
    state: proxy::ProxyState,
    acceptor: tokio_rustls::TlsAcceptor,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((bind.as_str(), port)).await?;
    info!(%bind, %port, "relay: TLS proxy listening");
    serve_http(listener, state, Some(acceptor)).await
}

async fn serve_http(
    listener: TcpListener,
    state: proxy::ProxyState,
    acceptor: Option<tokio_rustls::TlsAcceptor>,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(socket).await {
                    Ok(tls_stream) => {
                        serve_one(TokioIo::new(tls_stream), state).await
                    }
                    Err(e) => {
                        warn!(%peer, "relay: TLS handshake failed: {e}");
                        return;
                    }
                },
                None => serve_one(TokioIo::new(socket), state).await,
            };
            if let Err(e) = result {
                if !e.to_string().contains("connection closed") {
                    warn!(%peer, "relay: proxy connection error: {e}");
                }
            }
        });
    }
}

async fn serve_one<IO>(io: TokioIo<IO>, state: proxy::ProxyState) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let svc = service_fn(move |req| {
        let state = state.clone();
        async move { proxy::handle_request(req, state).await }
    });
    auto::Builder::new(TokioExecutor::new())
        .http1()
        .serve_connection(io, svc)
        .await
}
