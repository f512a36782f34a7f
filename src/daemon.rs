//! Process wiring and global shutdown
//!
//! The daemon owns every long running task:
//!
//! ```text
//!   ConfigReloader ──► watch<Arc<Config>> ──► watchers, aggregator
//!   Reconciler ──► WorkerRegistry ──► EndpointWatcher (one per node)
//!   EndpointWatcher ──► Notifier ──► Aggregator ──► WebhookChannel
//! ```
//!
//! Shutdown order: the root token stops watchers, the reconciler and the
//! reloader; once every watcher has exited the aggregator is cancelled and
//! performs its final flush.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cluster::{
    Discovery, DnsDiscovery, Reconciler, WatcherSpawner, WithStaticNodes, WorkerRegistry,
};
use crate::config::{self, Config, ConfigReloader, DiscoveryConfig};
use crate::error::{Error, Result};
use crate::notifications::{mailbox, Aggregator, Channel, Notifier, WebhookChannel};
use crate::vault::{SealApi, VaultClient};

/// Top-level runner
pub struct Daemon {
    config: Config,
    config_path: Option<PathBuf>,
    api: Option<Arc<dyn SealApi>>,
    discovery: Option<(Arc<dyn Discovery>, Duration)>,
    channels: Vec<Box<dyn Channel>>,
}

impl Daemon {
    /// Create a daemon from a validated configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            config_path: None,
            api: None,
            discovery: None,
            channels: Vec::new(),
        }
    }

    /// Reload configuration from `path` while running
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Use `api` instead of the HTTP client
    pub fn with_seal_api(mut self, api: Arc<dyn SealApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Use `discovery` instead of the configured DNS discovery
    ///
    /// Configured static nodes are still merged in.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>, interval: Duration) -> Self {
        self.discovery = Some((discovery, interval));
        self
    }

    /// Deliver reports to `channel` in addition to the configured webhook
    pub fn with_channel(mut self, channel: Box<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    fn discovery(&mut self) -> Option<(Arc<dyn Discovery>, Duration)> {
        let (inner, interval) = match self.discovery.take() {
            Some(injected) => injected,
            None => {
                let cfg: &DiscoveryConfig = self.config.discovery.as_ref()?;
                let dns: Arc<dyn Discovery> = Arc::new(DnsDiscovery::from_config(cfg));
                (dns, cfg.interval())
            }
        };

        if self.config.nodes.is_empty() {
            return Some((inner, interval));
        }
        let merged = WithStaticNodes::new(inner, self.config.nodes.iter().cloned());
        Some((Arc::new(merged), interval))
    }

    /// Run until `shutdown` resolves
    ///
    /// Fails only during startup: building the HTTP client or webhook, or
    /// the first discovery pass in dynamic mode.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (config_tx, config_rx) = config::channel(self.config.clone());
        let root = CancellationToken::new();
        let notify_cancel = CancellationToken::new();

        let api = match self.api.take() {
            Some(api) => api,
            None => Arc::new(
                VaultClient::new(self.config.request_timeout(), self.config.tls_skip_verify)
                    .map_err(Error::Client)?,
            ),
        };

        let (notifier, aggregator) = if self.config.notifications.enabled {
            let (notifier, inbox) = mailbox();
            let mut aggregator = Aggregator::new(inbox, config_rx.clone());
            if let Some(webhook) = &self.config.notifications.webhook {
                let channel = WebhookChannel::new(webhook.clone())?;
                tracing::info!(
                    url = channel.url(),
                    config = %channel.config(),
                    "sending reports to webhook"
                );
                aggregator.add_channel(Box::new(channel));
            }
            for channel in self.channels.drain(..) {
                aggregator.add_channel(channel);
            }
            let handle = tokio::spawn(aggregator.run(notify_cancel.clone()));
            (notifier, Some(handle))
        } else {
            (Notifier::disabled(), None)
        };

        let spawner = Arc::new(WatcherSpawner::new(api, config_rx, notifier));
        let registry = Arc::new(WorkerRegistry::new(spawner, root.clone()));

        tracing::info!(
            environment = %self.config.environment,
            nodes = self.config.nodes.len(),
            dynamic = self.config.discovery.is_some() || self.discovery.is_some(),
            notifications = aggregator.is_some(),
            "starting vault-unseal"
        );

        let reconciler = match self.discovery() {
            Some((discovery, interval)) => {
                let reconciler = Reconciler::new(registry.clone(), discovery, interval);
                if let Err(e) = reconciler.reconcile_once().await {
                    tracing::error!(error = %e, "initial discovery failed");
                    stop_all(&registry, &notify_cancel, aggregator).await;
                    return Err(e.into());
                }
                Some(tokio::spawn(reconciler.run(root.clone())))
            }
            None => {
                for node in &self.config.nodes {
                    registry.start(node).await;
                }
                None
            }
        };

        let reloader = self.config_path.take().map(|path| {
            tracing::info!(path = %path.display(), "watching config file for changes");
            tokio::spawn(ConfigReloader::new(path, config_tx).run(root.clone()))
        });

        shutdown.await;
        tracing::info!("shutdown requested, stopping workers");

        root.cancel();
        for (name, task) in [("reconciler", reconciler), ("config reloader", reloader)] {
            if let Some(task) = task {
                join(name, task).await;
            }
        }
        stop_all(&registry, &notify_cancel, aggregator).await;

        tracing::info!("shutdown complete");
        Ok(())
    }
}

async fn stop_all(
    registry: &WorkerRegistry,
    notify_cancel: &CancellationToken,
    aggregator: Option<JoinHandle<()>>,
) {
    registry.shutdown().await;
    notify_cancel.cancel();
    if let Some(task) = aggregator {
        join("notifier", task).await;
    }
}

async fn join(name: &str, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        tracing::warn!(task = name, error = %e, "task exited abnormally");
    }
}
