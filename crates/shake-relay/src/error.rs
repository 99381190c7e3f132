use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while relaying alarm notifications.
///
/// Only [`RelayError::Bind`], [`RelayError::PidLock`] and
/// [`RelayError::Config`] are fatal; everything else is scoped to a single
/// connection and is logged before the accept loop moves on.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the relay tried to bind.
        addr: SocketAddr,
        /// Underlying socket error.
        source: std::io::Error,
    },
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer did not send its message within the read timeout.
    #[error("timed out reading message")]
    ReadTimeout,
    /// The inbound message was not valid UTF-8 or had too few fields.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// Reverse lookup of the peer address failed.
    #[error("reverse lookup failed: {0}")]
    Resolve(String),
    /// The peer resolved to a hostname outside the allowlist.
    #[error("unauthorized peer {peer} ({hostname})")]
    Unauthorized {
        /// Socket address of the rejected peer.
        peer: SocketAddr,
        /// Hostname the peer resolved to.
        hostname: String,
    },
    /// The event catalog could not be read.
    #[error("event catalog error: {0}")]
    Catalog(String),
    /// The aftershock zone store could not be loaded or saved.
    #[error("zone store error: {0}")]
    ZoneStore(String),
    /// Another instance already holds the pid lock.
    #[error("pid file {} is locked{}", path.display(), pid.map(|p| format!(" by process {p}")).unwrap_or_default())]
    PidLock {
        /// Path of the pid file.
        path: PathBuf,
        /// Pid recorded by the holder, if readable.
        pid: Option<u32>,
    },
    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
