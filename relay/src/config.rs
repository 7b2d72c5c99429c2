//! Relay configuration (spec.md §6 "Configuration parameters").
//!
//! Generalizes the teacher's plain `std::env::var` reads in
//! `relay/src/main.rs` into a `clap::Parser` struct with `env` fallback, so
//! the teacher's `ZTUNNEL_DOMAIN`/`PORT` convention keeps working as an
//! override path alongside flags.

use std::path::PathBuf;

use clap::Parser;

/// The subway relay: exposes per-client subdomains of a shared base domain.
#[derive(Debug, Clone, Parser)]
#[command(name = "subway-relay", version, about)]
pub struct RelayConfig {
    /// Address the control-channel listener binds to.
    #[arg(long, env = "SUBWAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// TCP port clients dial to open a control channel.
    #[arg(long, env = "SUBWAY_CONTROL_PORT", default_value_t = 5678)]
    pub control_port: u16,

    /// Plain-HTTP public listener port.
    #[arg(long, env = "SUBWAY_PROXY_PORT", default_value_t = 80)]
    pub proxy_port_plain: u16,

    /// TLS public listener port (only bound when `--tls` is set).
    #[arg(long, env = "SUBWAY_PROXY_PORT_TLS", default_value_t = 443)]
    pub proxy_port_tls: u16,

    /// Base domain tenants are reachable under, e.g. `example.com`.
    #[arg(long, env = "SUBWAY_DOMAIN", default_value = "example.com")]
    pub domain: String,

    /// Trust `X-Forwarded-Host` instead of the `Host` header (spec.md §4.4 step 1).
    #[arg(long, env = "SUBWAY_BEHIND_PROXY", default_value_t = false)]
    pub behind_proxy: bool,

    /// Terminate TLS on the public listener.
    #[arg(long, env = "SUBWAY_TLS", default_value_t = false)]
    pub tls: bool,

    /// PEM certificate chain path (required when `--tls` is set).
    #[arg(long, env = "SUBWAY_CERT_PATH")]
    pub cert_path: Option<PathBuf>,

    /// PEM private key path (required when `--tls` is set).
    #[arg(long, env = "SUBWAY_KEY_PATH")]
    pub key_path: Option<PathBuf>,

    /// Seconds an upstream registration stays valid before expiring (`EXPIRE_TIME`).
    #[arg(long, env = "SUBWAY_EXPIRE_TIME", default_value_t = 3600)]
    pub expire_time: u64,

    /// Seconds between registry cleanup sweeps (`CLEAN_UP_INTERVAL`).
    #[arg(long, env = "SUBWAY_CLEANUP_INTERVAL", default_value_t = 60)]
    pub cleanup_interval: u64,
}

impl RelayConfig {
    /// Validate cross-field constraints clap's declarative parsing can't express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tls && (self.cert_path.is_none() || self.key_path.is_none()) {
            anyhow::bail!("--tls requires both --cert-path and --key-path");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_without_cert_paths_fails_validation() {
        let mut cfg = RelayConfig::parse_from(["subway-relay"]);
        cfg.tls = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn defaults_match_spec() {
        let cfg = RelayConfig::parse_from(["subway-relay"]);
        assert_eq!(cfg.control_port, 5678);
        assert_eq!(cfg.proxy_port_plain, 80);
        assert_eq!(cfg.proxy_port_tls, 443);
        assert_eq!(cfg.expire_time, 3600);
        assert_eq!(cfg.cleanup_interval, 60);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert!(!cfg.behind_proxy);
        assert!(!cfg.tls);
    }
}
