//! Per-endpoint watch/unseal loop
//!
//! One [`EndpointWatcher`] runs per node address. Each iteration waits for
//! the check interval plus the error backoff, checks the seal status and, if
//! the node is sealed, submits every configured share in order until the node
//! reports unsealed.
//!
//! ```text
//!  Waiting ──► Checking ──► Unsealing ──┐
//!     ▲            │                    │
//!     └────────────┴────────────────────┘
//!     │
//!     └── cancelled ──► Stopped
//! ```
//!
//! Cancellation is only observed while waiting; a token sequence in progress
//! always runs to the end of its iteration.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{Config, ConfigRx};
use crate::error::{Error, ErrorCategory, UnsealErrorTrait};
use crate::notifications::Notifier;
use crate::vault::SealApi;

/// Backoff added per consecutive error
pub const ERROR_BACKOFF_STEP: Duration = Duration::from_secs(30);

/// Error backoff for a given consecutive error count
///
/// `min(max_check_interval, check_interval + 30s × error_count)`
pub fn backoff(check_interval: Duration, max_check_interval: Duration, error_count: u32) -> Duration {
    ERROR_BACKOFF_STEP
        .saturating_mul(error_count)
        .saturating_add(check_interval)
        .min(max_check_interval)
}

/// What a single check iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Node reported unsealed
    Unsealed,
    /// Status check failed and was reported
    CheckFailed,
    /// Status check timed out for the first time and was only logged
    BlipSuppressed,
    /// Node was sealed; `submitted` shares were sent and `unsealed` tells
    /// whether one of them completed the quorum
    UnsealAttempted { submitted: usize, unsealed: bool },
}

/// Watch/unseal state machine for one node
pub struct EndpointWatcher {
    addr: String,
    api: Arc<dyn SealApi>,
    config: ConfigRx,
    notifier: Notifier,
    error_count: u32,
}

impl EndpointWatcher {
    /// Create a watcher for `addr`
    pub fn new(
        addr: impl Into<String>,
        api: Arc<dyn SealApi>,
        config: ConfigRx,
        notifier: Notifier,
    ) -> Self {
        Self {
            addr: addr.into(),
            api,
            config,
            notifier,
            error_count: 0,
        }
    }

    /// Address this watcher checks
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Consecutive errors since the node was last seen unsealed
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Delay before the next check under `config`
    pub fn next_delay(&self, config: &Config) -> Duration {
        config.check_interval().saturating_add(backoff(
            config.check_interval(),
            config.max_check_interval(),
            self.error_count,
        ))
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let config = self.config.borrow().clone();
            let delay = self.next_delay(&config);

            if self.error_count > 0 {
                info!(
                    addr = %self.addr,
                    delay = ?delay,
                    errors = self.error_count,
                    "delaying checks due to errors"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(addr = %self.addr, "closing worker");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            self.check_once(&config).await;
        }
    }

    /// Perform one check (and unseal attempt if needed) under `config`
    pub async fn check_once(&mut self, config: &Config) -> CheckOutcome {
        debug!(addr = %self.addr, "running checks");

        let status = match self.api.check_status(&self.addr).await {
            Ok(status) => status,
            Err(e) => {
                self.error_count = self.error_count.saturating_add(1);
                let err = Error::from(e);

                let category = err.category();
                if category == ErrorCategory::TransientNetwork && self.error_count == 1 {
                    error!(addr = %self.addr, %category, error = %err, "probably a blip, not reporting");
                    return CheckOutcome::BlipSuppressed;
                }

                error!(addr = %self.addr, %category, error = %err, "seal status check failed");
                self.notifier.error(err.to_string());
                return CheckOutcome::CheckFailed;
            }
        };

        info!(addr = %self.addr, status = %status, "seal status");
        if !status.sealed {
            self.error_count = 0;
            return CheckOutcome::Unsealed;
        }

        let mut submitted = 0;
        for (i, token) in config.tokens.iter().enumerate() {
            info!(
                addr = %self.addr,
                token = i + 1,
                progress = status.progress,
                threshold = status.threshold,
                "using unseal token"
            );
            submitted += 1;

            match self.api.unseal(&self.addr, token).await {
                Ok(response) => {
                    info!(addr = %self.addr, token = i + 1, "token successfully sent");
                    if !response.sealed {
                        self.notifier
                            .info(format!("(was sealed) {} now unsealed with tokens", self.addr));
                        return CheckOutcome::UnsealAttempted {
                            submitted,
                            unsealed: true,
                        };
                    }
                }
                Err(e) => {
                    let err = Error::unseal(i + 1, &self.addr, e);
                    error!(addr = %self.addr, category = %err.category(), error = %err, "unseal token rejected");
                    self.notifier.error(err.to_string());
                    self.error_count = self.error_count.saturating_add(1);
                }
            }
        }

        CheckOutcome::UnsealAttempted {
            submitted,
            unsealed: false,
        }
    }
}
