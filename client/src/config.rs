//! Client CLI configuration (spec.md §6 "Configuration parameters").
//!
//! Replaces the teacher's `ztunnel.yml` multi-tunnel config file with a
//! single-tunnel `clap::Parser` struct — this system has no multi-tunnel
//! or auth-token concept (spec.md Non-goals).

use clap::Parser;

/// The subway client: expose a local TCP service through a subway relay.
#[derive(Debug, Clone, Parser)]
#[command(name = "subway-client", version, about)]
pub struct ClientConfig {
    /// Local TCP port to expose.
    pub local_port: u16,

    /// Relay control-channel host.
    #[arg(long, env = "SUBWAY_RELAY_HOST", default_value = "127.0.0.1")]
    pub relay_host: String,

    /// Relay control-channel port.
    #[arg(long, env = "SUBWAY_RELAY_PORT", default_value_t = 5678)]
    pub relay_port: u16,

    /// Requested subdomain (server may assign a different one if taken).
    #[arg(long)]
    pub subdomain: Option<String>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    pub verbose: bool,
}
