//! vault-unseal - automatic unsealing for Vault clusters
//!
//! Watches the seal status of every member of a Vault cluster and submits
//! the configured unseal shares to any member found sealed. Failures are
//! batched into rate-limited reports.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading, validation and hot reload
//! - [`vault`] - Seal status and unseal calls against a node
//! - [`watcher`] - Per-node check/unseal loop with error backoff
//! - [`cluster`] - Discovery, worker registry and reconciliation
//! - [`notifications`] - Failure event aggregation and delivery
//! - [`daemon`] - Wiring and shutdown sequencing
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use vault_unseal::config;
//! use vault_unseal::daemon::Daemon;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load(None)?;
//!     Daemon::new(config)
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod daemon;
pub mod error;
pub mod notifications;
pub mod vault;
pub mod watcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{Discovery, WorkerRegistry};
    pub use crate::config::Config;
    pub use crate::daemon::Daemon;
    pub use crate::error::{Error, ErrorCategory, Result, UnsealErrorTrait};
    pub use crate::notifications::{Channel, Notifier, Report};
    pub use crate::vault::{SealApi, SealStatus, VaultClient};
    pub use crate::watcher::EndpointWatcher;
}
