//! Aftershock exclusion zones.
//!
//! A zone is a circle around a large event's epicenter. Smaller events that
//! fall inside it while it is active are treated as aftershocks and are not
//! relayed. Zones are keyed by the composite id of their defining event and
//! expire a fixed time after that event's origin.

use crate::error::RelayError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Everything a zone check or definition needs to know about one event.
#[derive(Debug, Clone, PartialEq)]
pub struct AftershockZoneQuery {
    /// Epicenter latitude in degrees.
    pub lat: f64,
    /// Epicenter longitude in degrees.
    pub lon: f64,
    /// Network id followed by event id.
    pub composite_id: String,
    /// Event magnitude.
    pub magnitude: f64,
    /// Events below this magnitude inside an active zone are suppressed.
    pub magnitude_limit: f64,
    /// Event origin time.
    pub origin_time: DateTime<Utc>,
}

/// Result of a zone check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneCheck {
    /// The event lies in an active zone and is below the magnitude limit.
    pub inside_active_zone_below_limit: bool,
    /// Composite id of the zone's defining event, when suppressed.
    pub zone_id: Option<String>,
}

/// Store of active exclusion zones.
///
/// Callers must run [`ZoneRegistry::cleanup_expired`] before every
/// [`ZoneRegistry::check`].
pub trait ZoneRegistry: Send + Sync {
    /// Purge expired zones. `magnitude_limit` is the limit the following
    /// check runs under. Returns how many zones were removed.
    fn cleanup_expired(&mut self, magnitude_limit: f64) -> Result<usize, RelayError>;

    /// Decide whether `query` falls inside an active zone below its limit.
    fn check(&self, query: &AftershockZoneQuery) -> ZoneCheck;

    /// Register (or replace) the zone defined by `query`'s event.
    fn define(&mut self, query: &AftershockZoneQuery) -> Result<(), RelayError>;
}

/// One active exclusion zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Composite id of the defining event.
    pub defining_id: String,
    /// Center latitude in degrees.
    pub lat: f64,
    /// Center longitude in degrees.
    pub lon: f64,
    /// Magnitude of the defining event.
    pub magnitude: f64,
    /// Zone radius in kilometers.
    pub radius_km: f64,
    /// Origin time of the defining event.
    pub defined_at: DateTime<Utc>,
    /// When the zone stops suppressing.
    pub expires_at: DateTime<Utc>,
}

impl Zone {
    fn contains(&self, query: &AftershockZoneQuery) -> bool {
        query.origin_time >= self.defined_at
            && query.origin_time < self.expires_at
            && distance_km(self.lat, self.lon, query.lat, query.lon) <= self.radius_km
    }
}

/// Aftershock zone length for a mainshock of magnitude `m` (Kagan 2002):
/// 20 km at M6, growing by `sqrt(10)` per magnitude unit.
#[must_use]
pub fn zone_radius_km(m: f64) -> f64 {
    20.0 * 10f64.powf((m - 6.0) / 2.0)
}

/// Great-circle distance between two points, in kilometers.
#[must_use]
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Serialization wrapper matching the TOML file format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ZonesFile {
    #[serde(default)]
    zones: Vec<Zone>,
}

/// In-memory zone store, optionally mirrored to a TOML file after every
/// mutation so zones survive restarts.
#[derive(Debug)]
pub struct ZoneStore {
    zones: BTreeMap<String, Zone>,
    lifetime: Duration,
    path: Option<PathBuf>,
}

impl ZoneStore {
    /// A store that is never persisted.
    #[must_use]
    pub fn in_memory(lifetime: Duration) -> Self {
        Self {
            zones: BTreeMap::new(),
            lifetime,
            path: None,
        }
    }

    /// Load zones from `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ZoneStore`] if the file exists but cannot be
    /// read or parsed.
    pub fn open(path: PathBuf, lifetime: Duration) -> Result<Self, RelayError> {
        let file_data = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| RelayError::ZoneStore(format!("{}: {e}", path.display())))?;
            toml::from_str::<ZonesFile>(&contents)
                .map_err(|e| RelayError::ZoneStore(format!("{}: {e}", path.display())))?
        } else {
            ZonesFile::default()
        };

        let zones = file_data
            .zones
            .into_iter()
            .map(|z| (z.defining_id.clone(), z))
            .collect();

        Ok(Self {
            zones,
            lifetime,
            path: Some(path),
        })
    }

    /// Active zones, ordered by defining id.
    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    /// Number of stored zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether no zones are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// [`ZoneRegistry::cleanup_expired`] against an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ZoneStore`] if persisting the result fails.
    pub fn cleanup_expired_at(
        &mut self,
        now: DateTime<Utc>,
        magnitude_limit: f64,
    ) -> Result<usize, RelayError> {
        let before = self.zones.len();
        self.zones
            .retain(|_, z| z.expires_at > now);
        let removed = before - self.zones.len();
        if removed > 0 {
            debug!(
                "purged {} expired aftershock zones (limit M{:.1})",
                removed, magnitude_limit
            );
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<(), RelayError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = ZonesFile {
            zones: self.zones.values().cloned().collect(),
        };
        let contents =
            toml::to_string_pretty(&file).map_err(|e| RelayError::ZoneStore(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RelayError::ZoneStore(format!("{}: {e}", parent.display())))?;
        }
        std::fs::write(path, contents)
            .map_err(|e| RelayError::ZoneStore(format!("{}: {e}", path.display())))
    }
}

impl ZoneRegistry for ZoneStore {
    fn cleanup_expired(&mut self, magnitude_limit: f64) -> Result<usize, RelayError> {
        self.cleanup_expired_at(Utc::now(), magnitude_limit)
    }

    fn check(&self, query: &AftershockZoneQuery) -> ZoneCheck {
        if query.magnitude >= query.magnitude_limit {
            return ZoneCheck::default();
        }
        // An update to a defining event is never its own aftershock.
        let zone = self
            .zones
            .values()
            .filter(|z| z.defining_id != query.composite_id)
            .find(|z| z.contains(query));
        match zone {
            Some(z) => ZoneCheck {
                inside_active_zone_below_limit: true,
                zone_id: Some(z.defining_id.clone()),
            },
            None => ZoneCheck::default(),
        }
    }

    fn define(&mut self, query: &AftershockZoneQuery) -> Result<(), RelayError> {
        let expires_at = query
            .origin_time
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| {
                RelayError::ZoneStore(format!(
                    "zone for {} expires out of range",
                    query.composite_id
                ))
            })?;
        let zone = Zone {
            defining_id: query.composite_id.clone(),
            lat: query.lat,
            lon: query.lon,
            magnitude: query.magnitude,
            radius_km: zone_radius_km(query.magnitude),
            defined_at: query.origin_time,
            expires_at,
        };
        self.zones.insert(zone.defining_id.clone(), zone);
        self.save()
    }
}
