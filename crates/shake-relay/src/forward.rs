//! Best-effort delivery to the downstream processing queue.
//!
//! Each record travels over its own short-lived TCP connection as a single
//! JSON line. There is no retry and no buffering.

use crate::event::Event;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Downstream topic of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// An accepted alarm with full event attributes.
    Origin,
    /// A cancellation of a previously relayed event.
    Cancel,
}

impl Topic {
    /// Wire and metrics label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downstream record: a topic plus a key/value payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueRecord {
    /// Record topic.
    pub topic: Topic,
    /// Topic-specific fields.
    pub payload: Value,
}

impl QueueRecord {
    /// `origin` record for an accepted alarm.
    #[must_use]
    pub fn origin(event: &Event) -> Self {
        Self {
            topic: Topic::Origin,
            payload: json!({
                "id": event.id,
                "network": event.network_id,
                "event_id": event.composite_id(),
                "lat": event.lat,
                "lon": event.lon,
                "mag": event.magnitude,
                "time": event.formatted_origin_time(),
            }),
        }
    }

    /// `cancel` record for an event id.
    #[must_use]
    pub fn cancel(event_id: &str) -> Self {
        Self {
            topic: Topic::Cancel,
            payload: json!({ "id": event_id }),
        }
    }

    fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The record was written and the connection closed cleanly.
    Sent,
    /// The record is lost; the reason is for logging only.
    Failed(String),
}

/// Sends records to the downstream queue.
#[derive(Debug, Clone)]
pub struct Forwarder {
    host: String,
    port: u16,
    deadline: Duration,
}

impl Forwarder {
    /// Forwarder for `host:port`; connect and write share `deadline`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, deadline: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            deadline,
        }
    }

    /// Downstream endpoint as `host:port`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Make exactly one attempt to deliver `record`. Never panics or blocks
    /// past the deadline; all failures come back as [`ForwardOutcome::Failed`].
    pub async fn send(&self, record: &QueueRecord) -> ForwardOutcome {
        let line = match record.to_line() {
            Ok(line) => line,
            Err(e) => return ForwardOutcome::Failed(format!("serialization failed: {e}")),
        };

        let attempt = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.write_all(&line).await?;
            stream.shutdown().await
        };

        match timeout(self.deadline, attempt).await {
            Ok(Ok(())) => ForwardOutcome::Sent,
            Ok(Err(e)) => ForwardOutcome::Failed(format!("{}: {e}", self.endpoint())),
            Err(_) => ForwardOutcome::Failed(format!(
                "{}: timed out after {:?}",
                self.endpoint(),
                self.deadline
            )),
        }
    }
}
