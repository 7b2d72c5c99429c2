//! Subdomain → upstream registry with expiration (spec.md §4.3, C3).
//!
//! Generalizes `original_source/src/proxy.py`'s `Proxy.upstreams` dict plus
//! `_clean_up`/`register_upstream`, and the teacher's collision-handling
//! in `relay/src/main.rs` (`handle_socket`'s "subdomain taken → append
//! random suffix" path), into the spec's `register`/`lookup`/`touch`/`remove`
//! contract with a loopback-port `Upstream` and an `on_evict` callback
//! channel the control-session layer subscribes to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, Mutex};

const SUBDOMAIN_LEN: usize = 12;
const SUBDOMAIN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-";

/// The loopback endpoint a tenant's request listener (C7) is bound to.
#[derive(Debug, Clone, Copy)]
pub struct Upstream {
    pub host: std::net::IpAddr,
    pub port: u16,
    pub expires_at: Instant,
}

/// Subdomain → [`Upstream`] map with a background cleanup sweep.
pub struct Registry {
    entries: Mutex<HashMap<String, Upstream>>,
    ttl: Duration,
    domain: String,
    scheme: String,
}

impl Registry {
    pub fn new(ttl: Duration, domain: String, scheme: String) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            domain,
            scheme,
        }
    }

    /// Register `port` under `requested` (or a freshly generated subdomain
    /// if `requested` is `None` or already taken), returning the canonical
    /// `(subdomain, endpoint)` pair.
    pub async fn register(&self, requested: Option<String>, port: u16) -> (String, String) {
        let mut entries = self.entries.lock().await;

        let subdomain = match requested {
            Some(s) if !entries.contains_key(&s) => s,
            _ => loop {
                let candidate = Self::gen_subdomain();
                if !entries.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        entries.insert(
            subdomain.clone(),
            Upstream {
                host: std::net::IpAddr::from([127, 0, 0, 1]),
                port,
                expires_at: Instant::now() + self.ttl,
            },
        );

        let endpoint = self.build_endpoint(&subdomain);
        (subdomain, endpoint)
    }

    pub async fn lookup(&self, subdomain: &str) -> Option<Upstream> {
        self.entries.lock().await.get(subdomain).copied()
    }

    /// Bump a subdomain's expiry to `now + ttl`. Not required by the MVP
    /// (spec.md §4.3), kept for completeness since nothing else mutates a
    /// live entry's TTL.
    pub async fn touch(&self, subdomain: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(subdomain) {
            entry.expires_at = Instant::now() + self.ttl;
        }
    }

    pub async fn remove(&self, subdomain: &str) -> Option<Upstream> {
        self.entries.lock().await.remove(subdomain)
    }

    pub fn build_endpoint(&self, subdomain: &str) -> String {
        format!("{}://{}.{}", self.scheme, subdomain, self.domain)
    }

    /// Spawn the fixed-interval cleanup sweep (spec.md §4.3). Evicted
    /// subdomains are pushed onto the returned channel so the session layer
    /// (C5) can tear down the matching `ControlSession`.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
    ) -> (tokio::task::JoinHandle<()>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let expired: Vec<String> = {
                    let mut entries = self.entries.lock().await;
                    let expired: Vec<String> = entries
                        .iter()
                        .filter(|(_, u)| u.expires_at < now)
                        .map(|(k, _)| k.clone())
                        .collect();
                    for key in &expired {
                        entries.remove(key);
                    }
                    expired
                };
                for subdomain in expired {
                    tracing::info!(%subdomain, "registry: evicted expired upstream");
                    if tx.send(subdomain).is_err() {
                        return; // receiver dropped, engine is shutting down
                    }
                }
            }
        });
        (handle, rx)
    }

    fn gen_subdomain() -> String {
        let mut rng = rand::thread_rng();
        (0..SUBDOMAIN_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..SUBDOMAIN_ALPHABET.len());
                SUBDOMAIN_ALPHABET[idx] as char
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ttl: Duration) -> Registry {
        Registry::new(ttl, "test.local".into(), "https".into())
    }

    #[tokio::test]
    async fn register_returns_canonical_endpoint() {
        let r = registry(Duration::from_secs(3600));
        let (sub, endpoint) = r.register(Some("abc".into()), 4200).await;
        assert_eq!(sub, "abc");
        assert_eq!(endpoint, "https://abc.test.local");
        assert_eq!(r.lookup("abc").await.unwrap().port, 4200);
    }

    #[tokio::test]
    async fn collision_falls_back_to_generated_subdomain() {
        let r = registry(Duration::from_secs(3600));
        r.register(Some("dup".into()), 1111).await;
        let (second, _) = r.register(Some("dup".into()), 2222).await;
        assert_ne!(second, "dup");
        assert_eq!(second.len(), SUBDOMAIN_LEN);
        // original mapping for "dup" is untouched
        assert_eq!(r.lookup("dup").await.unwrap().port, 1111);
        assert_eq!(r.lookup(&second).await.unwrap().port, 2222);
    }

    #[tokio::test]
    async fn generated_subdomains_are_unique_across_many_registrations() {
        let r = registry(Duration::from_secs(3600));
        let mut seen = std::collections::HashSet::new();
        for port in 0..200u16 {
            let (sub, _) = r.register(None, port).await;
            assert!(seen.insert(sub), "subdomain collision observed");
        }
    }

    #[tokio::test]
    async fn remove_returns_prior_entry() {
        let r = registry(Duration::from_secs(3600));
        r.register(Some("abc".into()), 4200).await;
        let removed = r.remove("abc").await;
        assert!(removed.is_some());
        assert!(r.lookup("abc").await.is_none());
        assert!(r.remove("abc").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_evicts_expired_entries_within_one_interval() {
        let r = Arc::new(registry(Duration::from_millis(50)));
        r.register(Some("abc".into()), 4200).await;

        let (_handle, mut evicted) = r.clone().spawn_cleanup(Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(200)).await;
        let got = tokio::time::timeout(Duration::from_secs(1), evicted.recv())
            .await
            .expect("cleanup should have fired")
            .expect("channel should yield the evicted subdomain");
        assert_eq!(got, "abc");
        assert!(r.lookup("abc").await.is_none());
    }
}
