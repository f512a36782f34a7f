//! Cluster membership and worker supervision
//!
//! - [`discovery`]: where the desired set of node addresses comes from
//! - [`registry`]: live watchers keyed by address
//! - [`reconciler`]: periodic diff between the two

pub mod discovery;
pub mod reconciler;
pub mod registry;

pub use discovery::{Discovery, DiscoveryError, DnsDiscovery, WithStaticNodes};
pub use reconciler::{ReconcileReport, Reconciler};
pub use registry::{WatcherSpawner, WorkerRegistry, WorkerSpawner};
