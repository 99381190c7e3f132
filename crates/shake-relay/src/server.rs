use crate::access::{AccessControl, HostResolver};
use crate::config::RelayConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::RelayError;
use crate::event::EventLookup;
use crate::forward::Forwarder;
use crate::gate::AftershockGate;
use crate::listener::{Accept, Listener};
use crate::message::read_message;
use crate::metrics::counters;
use crate::zone::ZoneRegistry;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, trace, warn};

/// Everything the accept loop needs, owned by the loop.
///
/// Connections are handled strictly one at a time, so the zone store inside
/// the dispatcher is only ever touched from this task. Handling connections
/// concurrently would require putting it behind a mutex first: cleanup
/// mutates the state that checks read.
pub struct RelayState {
    /// Reverse-DNS allowlist.
    pub access: AccessControl,
    /// Alarm/cancel routing.
    pub dispatcher: Dispatcher,
    /// Upper bound on one accept wait.
    pub accept_timeout: Duration,
    /// Upper bound on reading one message.
    pub read_timeout: Duration,
    /// Largest message read from a connection.
    pub max_message_bytes: usize,
}

impl RelayState {
    /// Assemble the relay from configuration and its collaborators.
    ///
    /// `open_zones` is only called when the aftershock threshold is
    /// positive; otherwise no zone store is ever opened.
    ///
    /// # Errors
    ///
    /// Propagates the error from `open_zones`.
    pub fn from_config<F>(
        config: &RelayConfig,
        resolver: Box<dyn HostResolver>,
        lookup: Box<dyn EventLookup>,
        open_zones: F,
    ) -> Result<Self, RelayError>
    where
        F: FnOnce() -> Result<Box<dyn ZoneRegistry>, RelayError>,
    {
        let gate = if config.aftershock_enabled() {
            Some(AftershockGate::new(
                open_zones()?,
                config.aftershock.threshold,
                config.aftershock.magnitude_limit,
            ))
        } else {
            info!("aftershock threshold <= 0, zone suppression disabled");
            None
        };

        let forwarder = Forwarder::new(
            config.queue.host.clone(),
            config.queue.port,
            config.queue_timeout(),
        );

        Ok(Self {
            access: AccessControl::new(config.host_allowlist(), resolver),
            dispatcher: Dispatcher::new(lookup, gate, forwarder),
            accept_timeout: config.accept_timeout(),
            read_timeout: config.read_timeout(),
            max_message_bytes: config.listener.max_message_bytes,
        })
    }

    /// Authorize, read, close, dispatch. Returns the dispatch outcome if a
    /// message was decoded.
    pub async fn handle_connection(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Option<DispatchOutcome> {
        let host = match self.access.authorize(peer).await {
            Ok(host) => host,
            Err(e) => {
                counters::connections_total("rejected");
                warn!("rejecting connection from {}: {}", peer, e);
                return None;
            }
        };
        counters::connections_total("authorized");

        let message = read_message(&mut stream, self.max_message_bytes, self.read_timeout).await;
        // One message per connection.
        drop(stream);

        match message {
            Ok(msg) => Some(self.dispatcher.dispatch(&msg, &host).await),
            Err(RelayError::ReadTimeout) => {
                counters::messages_dropped_total("read_timeout");
                warn!("{} ({}): timed out waiting for message", host, peer);
                None
            }
            Err(e) => {
                counters::messages_dropped_total("malformed");
                warn!("{} ({}): dropping message: {}", host, peer, e);
                None
            }
        }
    }
}

/// # Errors
///
/// Returns an error if the listener has no local address.
pub async fn run(listener: Listener, state: RelayState) -> Result<(), RelayError> {
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the accept loop until the sender behind `shutdown_rx` signals or is
/// dropped.
///
/// Shutdown is only observed between connections; a message that is being
/// handled always runs to completion.
///
/// # Errors
///
/// Returns an error if the listener has no local address.
pub async fn run_with_shutdown(
    listener: Listener,
    mut state: RelayState,
    mut shutdown_rx: tokio::sync::watch::Receiver<()>,
) -> Result<(), RelayError> {
    let local_addr = listener.local_addr()?;
    info!("relay listening on {}", local_addr);

    loop {
        tokio::select! {
            accepted = listener.accept_next(state.accept_timeout) => {
                match accepted {
                    Accept::Connection(stream, peer) => {
                        state.handle_connection(stream, peer).await;
                    }
                    Accept::TimedOut => {
                        // Periodic work hooks in here.
                        trace!("no connection within {:?}", state.accept_timeout);
                    }
                    Accept::Failed(e) => {
                        counters::connections_total("failed");
                        warn!("failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("relay stopped");
    Ok(())
}
