use crate::event::Event;
use crate::metrics::counters;
use crate::zone::{AftershockZoneQuery, ZoneRegistry};
use tracing::{error, info, warn};

/// Outcome of running an event through the aftershock gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The event is an aftershock of an active zone and must not be relayed.
    Suppressed {
        /// Defining event of the zone that matched.
        zone_id: Option<String>,
    },
    /// The event may be relayed.
    Allowed {
        /// The event was large enough to define a new zone.
        zone_defined: bool,
    },
}

/// Decides suppression for alarms and registers new exclusion zones.
///
/// Only constructed when the defining threshold is positive; a relay
/// without a gate never touches a zone store.
pub struct AftershockGate {
    zones: Box<dyn ZoneRegistry>,
    define_threshold: f64,
    magnitude_limit: f64,
}

impl AftershockGate {
    /// Gate over `zones`. Events at or above `define_threshold` define zones;
    /// events below `magnitude_limit` inside a zone are suppressed.
    pub fn new(zones: Box<dyn ZoneRegistry>, define_threshold: f64, magnitude_limit: f64) -> Self {
        Self {
            zones,
            define_threshold,
            magnitude_limit,
        }
    }

    /// Zone query for `event` under the configured magnitude limit.
    #[must_use]
    pub fn query_for(&self, event: &Event) -> AftershockZoneQuery {
        AftershockZoneQuery {
            lat: event.lat,
            lon: event.lon,
            composite_id: event.composite_id(),
            magnitude: event.magnitude,
            magnitude_limit: self.magnitude_limit,
            origin_time: event.origin_time,
        }
    }

    /// Cleanup, check, then define.
    ///
    /// Suppression wins: a suppressed event never defines a zone, even when
    /// it is above the defining threshold.
    pub fn evaluate(&mut self, event: &Event) -> GateDecision {
        let query = self.query_for(event);

        if let Err(e) = self.zones.cleanup_expired(self.magnitude_limit) {
            warn!("zone cleanup for {} failed: {}", query.composite_id, e);
        }

        let check = self.zones.check(&query);
        if check.inside_active_zone_below_limit {
            return GateDecision::Suppressed {
                zone_id: check.zone_id,
            };
        }

        let mut zone_defined = false;
        if self.define_threshold > 0.0 && event.magnitude >= self.define_threshold {
            match self.zones.define(&query) {
                Ok(()) => {
                    counters::zones_defined_total();
                    info!(
                        "defined aftershock zone for {} (M{:.1})",
                        query.composite_id, event.magnitude
                    );
                }
                Err(e) => {
                    error!("failed to persist aftershock zone for {}: {}", query.composite_id, e);
                }
            }
            // The zone is active in memory even if persisting it failed.
            zone_defined = true;
        }

        GateDecision::Allowed { zone_defined }
    }
}
