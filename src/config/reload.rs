//! Hot reload of the configuration file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Config, ConfigError};
use crate::error::{Error, UnsealErrorTrait};

/// How often the config file is polled for changes
pub const CONFIG_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Polls the config file and publishes validated snapshots
///
/// A file that fails to load or validate is logged and ignored; the
/// previously published snapshot stays in effect.
pub struct ConfigReloader {
    path: PathBuf,
    tx: watch::Sender<Arc<Config>>,
    last_modified: Option<SystemTime>,
    interval: Duration,
}

impl ConfigReloader {
    /// Create a reloader for `path` publishing into `tx`
    pub fn new(path: impl Into<PathBuf>, tx: watch::Sender<Arc<Config>>) -> Self {
        let path = path.into();
        let last_modified = modified(&path).ok();
        Self {
            path,
            tx,
            last_modified,
            interval: CONFIG_REFRESH_INTERVAL,
        }
    }

    /// Override the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reload if the file changed since the last successful load
    ///
    /// Returns `Ok(true)` when a new snapshot was published.
    pub fn check_once(&mut self) -> Result<bool, ConfigError> {
        let mtime = modified(&self.path)?;
        if self.last_modified == Some(mtime) {
            return Ok(false);
        }

        let config = super::load(Some(self.path.as_path()))?;
        self.tx.send_replace(Arc::new(config));
        self.last_modified = Some(mtime);
        tracing::info!(path = %self.path.display(), "updated config");
        Ok(true)
    }

    /// Poll until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and the file was just loaded.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("closing config reloader");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_once() {
                        let err = Error::from(e);
                        tracing::error!(
                            path = %self.path.display(),
                            category = %err.category(),
                            error = %err,
                            "error reading config, keeping previous configuration"
                        );
                    }
                }
            }
        }
    }
}

fn modified(path: &std::path::Path) -> Result<SystemTime, ConfigError> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}
