//! Process lifecycle: attached (console) or detached (log file + pid lock).
//!
//! The mode is chosen once at startup. [`Lifecycle::enter`] installs logging
//! and acquires process-wide resources; the returned guard releases them
//! when it is dropped, however the relay exits.

use crate::config::{Args, RelayConfig};
use crate::error::RelayError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// A scoped process lifecycle strategy.
pub trait Lifecycle {
    /// Set up logging and acquire process resources.
    ///
    /// # Errors
    ///
    /// Fails if the log file cannot be opened or the pid lock is held.
    fn enter(&self) -> Result<LifecycleGuard, RelayError>;

    /// Short name for the startup log line.
    fn name(&self) -> &'static str;
}

/// Holds whatever a lifecycle acquired until the process is done with it.
#[must_use = "resources are released when the guard is dropped"]
pub struct LifecycleGuard {
    _pid_lock: Option<PidLock>,
}

/// Stay attached to the terminal and log to stderr.
pub struct Attached {
    verbose: u8,
}

/// Run as a background service: log to a file and hold a pid lock.
///
/// Forking away from the controlling terminal is left to the service
/// manager that starts the process.
pub struct Detached {
    verbose: u8,
    log_file: PathBuf,
    pid_file: PathBuf,
}

/// Pick the lifecycle named by the command line.
#[must_use]
pub fn select(args: &Args, config: &RelayConfig) -> Box<dyn Lifecycle> {
    if args.attached {
        Box::new(Attached {
            verbose: args.verbose,
        })
    } else {
        Box::new(Detached {
            verbose: args.verbose,
            log_file: config.daemon.log_file.clone(),
            pid_file: config.daemon.pid_file.clone(),
        })
    }
}

fn env_filter(verbose: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    }
}

impl Lifecycle for Attached {
    fn enter(&self) -> Result<LifecycleGuard, RelayError> {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter(self.verbose))
            .try_init()
            .map_err(|e| RelayError::Config(format!("failed to install logger: {e}")))?;
        Ok(LifecycleGuard { _pid_lock: None })
    }

    fn name(&self) -> &'static str {
        "attached"
    }
}

impl Lifecycle for Detached {
    fn enter(&self) -> Result<LifecycleGuard, RelayError> {
        // Lock first so a second instance fails before touching the log.
        let lock = PidLock::acquire(&self.pid_file)?;

        if let Some(parent) = self.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .map_err(|e| {
                RelayError::Config(format!(
                    "failed to open log file {}: {e}",
                    self.log_file.display()
                ))
            })?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter(self.verbose))
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .try_init()
            .map_err(|e| {
                RelayError::Config(format!(
                    "failed to install logger for {}: {e}",
                    self.log_file.display()
                ))
            })?;

        info!("pid {} locked {}", lock.pid(), lock.path().display());
        Ok(LifecycleGuard {
            _pid_lock: Some(lock),
        })
    }

    fn name(&self) -> &'static str {
        "detached"
    }
}

/// Exclusive lock on the pid file.
///
/// Acquired on startup, released and removed on drop.
pub struct PidLock {
    file: File,
    path: PathBuf,
    pid: u32,
}

impl PidLock {
    /// Lock `path` and record this process's pid in it.
    ///
    /// # Errors
    ///
    /// [`RelayError::PidLock`] if another process holds the lock, or
    /// [`RelayError::Io`] if the file cannot be created or written.
    pub fn acquire(path: &Path) -> Result<Self, RelayError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Not truncated until the lock is ours, so a refused caller can still
        // read the holder's pid.
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(RelayError::PidLock {
                path: path.to_path_buf(),
                pid: Self::read_existing_pid(path),
            });
        }

        let pid = std::process::id();
        file.set_len(0)?;
        writeln!(file, "{pid}")?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            pid,
        })
    }

    /// Pid written to the lock file.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn pid_lock_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("relay.pid");

        let lock = PidLock::acquire(&path).unwrap();
        assert_eq!(lock.pid(), std::process::id());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn second_lock_is_refused_with_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");

        let _first = PidLock::acquire(&path).unwrap();
        match PidLock::acquire(&path) {
            Err(RelayError::PidLock { pid, .. }) => assert_eq!(pid, Some(std::process::id())),
            Err(other) => panic!("expected PidLock, got {other:?}"),
            Ok(_) => panic!("second lock should fail"),
        }
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");

        drop(PidLock::acquire(&path).unwrap());
        assert!(!path.exists());
        assert!(PidLock::acquire(&path).is_ok());
    }

    #[test]
    fn select_follows_attached_flag() {
        let config = RelayConfig::default();
        let attached = Args::parse_from(["shake-relay", "--attached"]);
        assert_eq!(select(&attached, &config).name(), "attached");
        let detached = Args::parse_from(["shake-relay"]);
        assert_eq!(select(&detached, &config).name(), "detached");
    }

    #[test]
    fn detached_holds_pid_lock_for_guard_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let detached = Detached {
            verbose: 0,
            log_file: dir.path().join("log").join("relay.log"),
            pid_file: dir.path().join("relay.pid"),
        };

        let guard = detached.enter().unwrap();
        assert!(dir.path().join("log").join("relay.log").exists());
        assert!(PidLock::acquire(&dir.path().join("relay.pid")).is_err());
        drop(guard);
        assert!(PidLock::acquire(&dir.path().join("relay.pid")).is_ok());

        // A logger is installed now; a second one is refused, and the pid
        // lock taken on the way is released again.
        let again = Detached {
            verbose: 0,
            log_file: dir.path().join("log").join("relay.log"),
            pid_file: dir.path().join("second.pid"),
        };
        match again.enter() {
            Err(RelayError::Config(msg)) => assert!(msg.contains("logger"), "{msg}"),
            Err(other) => panic!("expected Config, got {other:?}"),
            Ok(_) => panic!("second logger install should fail"),
        }
        assert!(!dir.path().join("second.pid").exists());
    }
}
