use clap::Parser;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI arguments for the relay daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "shake-relay")]
#[command(about = "Seismic alarm relay with aftershock zone suppression")]
#[command(version)]
pub struct Args {
    /// Stay attached to the terminal and log to the console.
    #[arg(short, long)]
    pub attached: bool,
    /// Path to the TOML configuration file.
    #[arg(long, env = "SHAKE_RELAY_CONFIG")]
    pub config: Option<PathBuf>,
    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration loaded from defaults, file and environment.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct RelayConfig {
    /// Inbound socket settings.
    pub listener: ListenerConfig,
    /// Upstream host allowlist.
    pub access: AccessConfig,
    /// Aftershock exclusion zone settings.
    pub aftershock: AftershockConfig,
    /// Downstream queue endpoint.
    pub queue: QueueConfig,
    /// Event catalog location.
    pub catalog: CatalogConfig,
    /// Detached-mode process files.
    pub daemon: DaemonConfig,
    /// Prometheus endpoint.
    pub metrics: MetricsConfig,
}

/// Inbound socket settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// Port to listen on.
    pub port: u16,
    /// Upper bound on a single accept wait, in seconds.
    pub accept_timeout_s: u64,
    /// Upper bound on reading one message, in seconds.
    pub read_timeout_s: u64,
    /// Largest message read from a connection.
    pub max_message_bytes: usize,
}

/// Upstream host allowlist.
#[derive(Debug, Deserialize, Clone)]
pub struct AccessConfig {
    /// Hostnames permitted to submit messages.
    pub allowed_hosts: Vec<String>,
}

/// Aftershock exclusion zone settings.
#[derive(Debug, Deserialize, Clone)]
pub struct AftershockConfig {
    /// Magnitude at which an event defines a new zone. `<= 0` disables zones.
    pub threshold: f64,
    /// Events inside a zone below this magnitude are suppressed.
    pub magnitude_limit: f64,
    /// Where active zones are persisted.
    pub zone_file: PathBuf,
    /// Lifetime of a zone after its defining origin time, in hours.
    pub zone_lifetime_h: u64,
}

/// Downstream queue endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Queue host name or address.
    pub host: String,
    /// Queue port.
    pub port: u16,
    /// Connect + write deadline for one record, in seconds.
    pub timeout_s: u64,
}

/// Event catalog location.
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Directory holding one `<event_id>.json` per event.
    pub events_dir: PathBuf,
}

/// Detached-mode process files.
#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Log file used when running detached.
    pub log_file: PathBuf,
    /// Pid lock file used when running detached.
    pub pid_file: PathBuf,
}

/// Prometheus endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// Whether to serve `/metrics` and `/health`.
    pub enabled: bool,
    /// Address the metrics endpoint binds.
    pub addr: SocketAddr,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 7725,
            accept_timeout_s: 30,
            read_timeout_s: 2,
            max_message_bytes: 1024,
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: vec!["localhost".to_string()],
        }
    }
}

impl Default for AftershockConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            magnitude_limit: 5.0,
            zone_file: PathBuf::from("/var/lib/shake-relay/zones.toml"),
            zone_lifetime_h: 72,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7726,
            timeout_s: 5,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            events_dir: PathBuf::from("/var/lib/shake-relay/events"),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("/var/log/shake-relay/shake-relay.log"),
            pid_file: PathBuf::from("/run/shake-relay/shake-relay.pid"),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: SocketAddr::from(([127, 0, 0, 1], 9725)),
        }
    }
}

impl RelayConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.listener.port == 0 {
            return Err("listener.port must be greater than 0".to_string());
        }
        if self.listener.accept_timeout_s == 0 {
            return Err("listener.accept_timeout_s must be greater than 0".to_string());
        }
        if self.listener.accept_timeout_s > 3600 {
            return Err("listener.accept_timeout_s exceeds reasonable limit (3600 seconds)".to_string());
        }
        if self.listener.read_timeout_s == 0 {
            return Err("listener.read_timeout_s must be greater than 0".to_string());
        }
        if self.listener.read_timeout_s > 300 {
            return Err("listener.read_timeout_s exceeds reasonable limit (300 seconds)".to_string());
        }
        if self.listener.max_message_bytes == 0 {
            return Err("listener.max_message_bytes must be greater than 0".to_string());
        }
        if self.listener.max_message_bytes > 65_536 {
            return Err("listener.max_message_bytes exceeds reasonable limit (65536 bytes)".to_string());
        }

        if self.access.allowed_hosts.iter().all(|h| h.trim().is_empty()) {
            return Err("access.allowed_hosts must name at least one host".to_string());
        }

        if !self.aftershock.threshold.is_finite() {
            return Err("aftershock.threshold must be a finite number".to_string());
        }
        if !self.aftershock.magnitude_limit.is_finite() {
            return Err("aftershock.magnitude_limit must be a finite number".to_string());
        }
        if self.aftershock_enabled() && self.aftershock.zone_lifetime_h == 0 {
            return Err("aftershock.zone_lifetime_h must be greater than 0".to_string());
        }
        if self.aftershock.zone_lifetime_h > 8760 {
            return Err("aftershock.zone_lifetime_h exceeds reasonable limit (8760 hours)".to_string());
        }

        if self.queue.host.is_empty() {
            return Err("queue.host must not be empty".to_string());
        }
        if self.queue.port == 0 {
            return Err("queue.port must be greater than 0".to_string());
        }
        if self.queue.timeout_s == 0 {
            return Err("queue.timeout_s must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Zone definition and suppression only run with a positive threshold.
    #[must_use]
    pub fn aftershock_enabled(&self) -> bool {
        self.aftershock.threshold > 0.0
    }

    /// Address the relay listens on.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listener.bind, self.listener.port)
    }

    /// Allowlist normalized for hostname comparison.
    #[must_use]
    pub fn host_allowlist(&self) -> HashSet<String> {
        self.access
            .allowed_hosts
            .iter()
            .map(|h| crate::access::normalize_hostname(h))
            .filter(|h| !h.is_empty())
            .collect()
    }

    /// Upper bound on one accept wait.
    #[must_use]
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.listener.accept_timeout_s)
    }

    /// Upper bound on reading one message.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.listener.read_timeout_s)
    }

    /// Deadline for one downstream send.
    #[must_use]
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.timeout_s)
    }
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    let d = RelayConfig::default();
    let mut builder = config::Config::builder()
        .set_default("listener.bind", d.listener.bind.to_string())?
        .set_default("listener.port", i64::from(d.listener.port))?
        .set_default(
            "listener.accept_timeout_s",
            d.listener.accept_timeout_s as i64,
        )?
        .set_default("listener.read_timeout_s", d.listener.read_timeout_s as i64)?
        .set_default(
            "listener.max_message_bytes",
            d.listener.max_message_bytes as i64,
        )?
        .set_default("access.allowed_hosts", d.access.allowed_hosts.clone())?
        .set_default("aftershock.threshold", d.aftershock.threshold)?
        .set_default("aftershock.magnitude_limit", d.aftershock.magnitude_limit)?
        .set_default(
            "aftershock.zone_file",
            d.aftershock.zone_file.to_string_lossy().into_owned(),
        )?
        .set_default(
            "aftershock.zone_lifetime_h",
            d.aftershock.zone_lifetime_h as i64,
        )?
        .set_default("queue.host", d.queue.host.as_str())?
        .set_default("queue.port", i64::from(d.queue.port))?
        .set_default("queue.timeout_s", d.queue.timeout_s as i64)?
        .set_default(
            "catalog.events_dir",
            d.catalog.events_dir.to_string_lossy().into_owned(),
        )?
        .set_default(
            "daemon.log_file",
            d.daemon.log_file.to_string_lossy().into_owned(),
        )?
        .set_default(
            "daemon.pid_file",
            d.daemon.pid_file.to_string_lossy().into_owned(),
        )?
        .set_default("metrics.enabled", d.metrics.enabled)?
        .set_default("metrics.addr", d.metrics.addr.to_string())?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SHAKE_RELAY")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("access.allowed_hosts"),
    );

    let settings = builder.build()?;
    let config: RelayConfig = settings.try_deserialize()?;

    Ok(config)
}
