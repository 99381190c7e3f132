use crate::error::RelayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Format used for origin times sent downstream.
pub const ORIGIN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Full attributes of a seismic event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seismic network code, e.g. `ci`.
    pub network_id: String,
    /// Event id within the network.
    pub id: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Magnitude.
    pub magnitude: f64,
    /// Origin time.
    pub origin_time: DateTime<Utc>,
}

impl Event {
    /// Network id followed by event id, e.g. `ci12345`.
    #[must_use]
    pub fn composite_id(&self) -> String {
        format!("{}{}", self.network_id, self.id)
    }

    /// Origin time in [`ORIGIN_TIME_FORMAT`].
    #[must_use]
    pub fn formatted_origin_time(&self) -> String {
        self.origin_time.format(ORIGIN_TIME_FORMAT).to_string()
    }
}

/// Resolves event ids to full event attributes.
#[async_trait]
pub trait EventLookup: Send + Sync {
    /// `Ok(None)` if the id is unknown.
    async fn lookup(&self, event_id: &str) -> Result<Option<Event>, RelayError>;
}

/// Event catalog stored as one JSON document per event.
pub struct CatalogLookup {
    dir: PathBuf,
}

impl CatalogLookup {
    /// Catalog rooted at `dir`.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

/// Ids become file names, so anything that could leave the directory is refused.
fn is_safe_id(event_id: &str) -> bool {
    !event_id.is_empty()
        && event_id != "."
        && !event_id.contains("..")
        && !event_id.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

#[async_trait]
impl EventLookup for CatalogLookup {
    async fn lookup(&self, event_id: &str) -> Result<Option<Event>, RelayError> {
        if !is_safe_id(event_id) {
            return Ok(None);
        }
        let path = self.dir.join(format!("{event_id}.json"));
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RelayError::Catalog(format!("{}: {e}", path.display())));
            }
        };
        let event = serde_json::from_slice(&data)
            .map_err(|e| RelayError::Catalog(format!("{}: {e}", path.display())))?;
        Ok(Some(event))
    }
}
