//! Seismic alarm relay: accepts `shake_alarm`/`shake_cancel` notifications
//! from allowlisted hosts, suppresses aftershocks inside active exclusion
//! zones, and forwards the rest to a downstream queue.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Reverse-DNS host allowlist.
pub mod access;
/// CLI argument parsing and relay configuration.
pub mod config;
/// Per-message routing of alarms and cancels.
pub mod dispatch;
/// Error types for relay operations.
pub mod error;
/// Event model and catalog lookup.
pub mod event;
/// Downstream queue records and delivery.
pub mod forward;
/// Aftershock suppression and zone definition.
pub mod gate;
/// Attached/detached process lifecycle.
pub mod lifecycle;
/// Bounded-wait listening socket.
pub mod listener;
pub mod message;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Accept loop and relay state.
pub mod server;
pub mod zone;

pub use server::{run, run_with_shutdown, RelayState};
