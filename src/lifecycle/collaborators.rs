//! Platform collaborators driven by the lifecycle controller.
//!
//! None of these are needed to serve connections; they are switched on once
//! the listeners are up and switched off when the loop stops.

use crate::error::ServiceError;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback used by background collaborators to report failures.
pub type ErrorHandler = Box<dyn Fn(String) + Send + Sync>;

/// Keeps the process in the foreground while the listener runs.
pub trait KeepAlive: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

/// Long-running helper that needs elevated privileges.
pub trait PrivilegedMonitor: Send + Sync {
    /// Begin monitoring. Failures are reported through `on_error` at any
    /// time until `stop` returns.
    fn start(&self, on_error: ErrorHandler);
    fn stop(&self);
}

/// A position fix delivered by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: Option<f64>,
    pub satellites: Option<u8>,
    /// Ground speed in knots.
    pub velocity: Option<f64>,
    pub time: DateTime<Utc>,
}

/// Sink for mock location fixes.
pub trait LocationProvider: Send + Sync {
    /// Claim the provider. Fails when the process may not supply mock
    /// locations.
    fn register(&self) -> Result<(), ServiceError>;
    fn unregister(&self);
    fn inject(&self, fix: &Fix) -> Result<(), String>;
}

/// Holds a provider registration for as long as the event loop runs.
pub struct ProviderGuard {
    provider: Arc<dyn LocationProvider>,
}

impl ProviderGuard {
    pub fn register(provider: Arc<dyn LocationProvider>) -> Result<Self, ServiceError> {
        provider.register()?;
        debug!("Location provider registered");
        Ok(Self { provider })
    }
}

impl Drop for ProviderGuard {
    fn drop(&mut self) {
        self.provider.unregister();
        debug!("Location provider unregistered");
    }
}

/// Keep-alive that only records the transition in the log.
#[derive(Debug, Default)]
pub struct LogKeepAlive;

impl KeepAlive for LogKeepAlive {
    fn start(&self) {
        info!("Foreground mode on");
    }

    fn stop(&self) {
        info!("Foreground mode off");
    }
}

/// Monitor that does nothing.
#[derive(Debug, Default)]
pub struct NoopMonitor;

impl PrivilegedMonitor for NoopMonitor {
    fn start(&self, _on_error: ErrorHandler) {}

    fn stop(&self) {}
}

/// Provider that logs fixes and remembers the latest one.
#[derive(Debug, Default)]
pub struct LoggingProvider {
    registered: AtomicBool,
    last_fix: Mutex<Option<Fix>>,
}

impl LoggingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn last_fix(&self) -> Option<Fix> {
        self.last_fix
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl LocationProvider for LoggingProvider {
    fn register(&self) -> Result<(), ServiceError> {
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unregister(&self) {
        self.registered.store(false, Ordering::SeqCst);
    }

    fn inject(&self, fix: &Fix) -> Result<(), String> {
        if !self.is_registered() {
            return Err("location provider is not registered".to_string());
        }

        info!(
            longitude = fix.longitude,
            latitude = fix.latitude,
            altitude = ?fix.altitude,
            satellites = ?fix.satellites,
            velocity = ?fix.velocity,
            "Location fix"
        );
        *self
            .last_fix
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(fix.clone());
        Ok(())
    }
}

/// `oom_score_adj` equivalent of the legacy `oom_adj` value -13.
pub const DEFAULT_OOM_SCORE_ADJ: i32 = -13 * 1000 / 17;

/// Lowers the process OOM score and re-applies it periodically, since the
/// system may reset it when the process changes state.
pub struct OomScoreMonitor {
    path: PathBuf,
    score: i32,
    interval: Duration,
    worker: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl OomScoreMonitor {
    pub fn new(score: i32) -> Self {
        Self::with_path("/proc/self/oom_score_adj", score, Duration::from_secs(5))
    }

    pub fn with_path(path: impl Into<PathBuf>, score: i32, interval: Duration) -> Self {
        Self {
            path: path.into(),
            score,
            interval,
            worker: Mutex::new(None),
        }
    }
}

impl Default for OomScoreMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_OOM_SCORE_ADJ)
    }
}

impl PrivilegedMonitor for OomScoreMonitor {
    fn start(&self, on_error: ErrorHandler) {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.is_some() {
            return;
        }

        let on_error = Arc::new(on_error);
        let reporter = on_error.clone();
        let (tx, rx) = mpsc::channel::<()>();
        let path = self.path.clone();
        let score = self.score;
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name("oom-score".to_string())
            .spawn(move || {
                let mut failing = false;
                loop {
                    match fs::write(&path, score.to_string()) {
                        Ok(()) => {
                            if failing {
                                debug!(path = %path.display(), score, "OOM score applied");
                            }
                            failing = false;
                        }
                        // Report once per failure streak
                        Err(e) if !failing => {
                            failing = true;
                            reporter(format!(
                                "Failed to set OOM score in {}: {e}",
                                path.display()
                            ));
                        }
                        Err(_) => {}
                    }

                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => *worker = Some((tx, handle)),
            Err(e) => on_error(format!("Failed to start OOM score monitor: {e}")),
        }
    }

    fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((tx, handle)) = worker {
            drop(tx);
            if handle.join().is_err() {
                warn!("OOM score monitor panicked");
            }
        }
    }
}

impl Drop for OomScoreMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
