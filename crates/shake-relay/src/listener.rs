use crate::error::RelayError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Result of one bounded accept wait.
#[derive(Debug)]
pub enum Accept {
    /// A peer connected.
    Connection(TcpStream, SocketAddr),
    /// Nobody connected before the wait ran out.
    TimedOut,
    /// `accept` itself failed; treated as a rejected connection.
    Failed(std::io::Error),
}

/// The relay's single listening socket.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind `addr` for the life of the process.
    ///
    /// # Errors
    ///
    /// [`RelayError::Bind`] if the socket cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, RelayError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        Ok(Self { inner })
    }

    /// Wrap an already-bound listener.
    #[must_use]
    pub fn from_tcp(inner: TcpListener) -> Self {
        Self { inner }
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.inner.local_addr()?)
    }

    /// Wait up to `wait` for the next connection. Never fails.
    pub async fn accept_next(&self, wait: Duration) -> Accept {
        match timeout(wait, self.inner.accept()).await {
            Ok(Ok((stream, addr))) => Accept::Connection(stream, addr),
            Ok(Err(e)) => Accept::Failed(e),
            Err(_) => Accept::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_times_out_without_peer() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let accepted = listener.accept_next(Duration::from_millis(50)).await;
        assert!(matches!(accepted, Accept::TimedOut));
    }

    #[tokio::test]
    async fn accept_returns_connection() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        match listener.accept_next(Duration::from_secs(1)).await {
            Accept::Connection(_, peer) => assert!(peer.ip().is_loopback()),
            other => panic!("expected connection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bind_conflict_is_bind_error() {
        let first = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = first.local_addr().unwrap();
        let err = Listener::bind(addr).await.err().unwrap();
        assert!(matches!(err, RelayError::Bind { .. }));
    }
}
