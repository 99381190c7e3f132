use crate::error::RelayError;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

/// Resolves a peer address to the hostname it is checked under.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Return the primary hostname for `ip`.
    async fn reverse(&self, ip: IpAddr) -> Result<String, RelayError>;
}

/// PTR lookups through the system resolver.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Build a resolver from `/etc/resolv.conf`, falling back to the
    /// built-in upstreams when the system configuration is unreadable.
    #[must_use]
    pub fn from_system_conf() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(r) => r,
            Err(e) => {
                warn!("system resolver config unavailable ({}), using defaults", e);
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self { resolver }
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<String, RelayError> {
        let response = self
            .resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| RelayError::Resolve(e.to_string()))?;

        response
            .iter()
            .next()
            .map(ToString::to_string)
            .ok_or_else(|| RelayError::Resolve(format!("no PTR record for {ip}")))
    }
}

/// Lowercase a hostname and strip the trailing root dot.
#[must_use]
pub fn normalize_hostname(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Reverse-DNS host allowlist. Fails closed.
pub struct AccessControl {
    allowlist: HashSet<String>,
    resolver: Box<dyn HostResolver>,
}

impl AccessControl {
    /// `allowlist` entries are normalized on the way in.
    pub fn new(allowlist: impl IntoIterator<Item = String>, resolver: Box<dyn HostResolver>) -> Self {
        Self {
            allowlist: allowlist
                .into_iter()
                .map(|h| normalize_hostname(&h))
                .filter(|h| !h.is_empty())
                .collect(),
            resolver,
        }
    }

    /// Check `peer` against the allowlist and return its hostname.
    ///
    /// # Errors
    ///
    /// [`RelayError::Resolve`] if the reverse lookup fails and
    /// [`RelayError::Unauthorized`] if the hostname is not allowed. Both
    /// mean the connection must be closed unread.
    pub async fn authorize(&self, peer: SocketAddr) -> Result<String, RelayError> {
        let hostname = normalize_hostname(&self.resolver.reverse(peer.ip()).await?);
        if self.allowlist.contains(&hostname) {
            debug!("peer {} authorized as {}", peer, hostname);
            Ok(hostname)
        } else {
            Err(RelayError::Unauthorized { peer, hostname })
        }
    }
}
