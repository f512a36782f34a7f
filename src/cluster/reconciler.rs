//! Keeps the worker registry in sync with discovery

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::discovery::{Discovery, DiscoveryError};
use super::registry::WorkerRegistry;
use crate::error::{Error, UnsealErrorTrait};

/// Changes applied by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Addresses that got a new worker
    pub added: Vec<String>,
    /// Addresses whose worker was stopped
    pub removed: Vec<String>,
}

impl ReconcileReport {
    /// Whether the pass changed nothing
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Periodic diff of discovered targets against live workers
pub struct Reconciler {
    registry: Arc<WorkerRegistry>,
    discovery: Arc<dyn Discovery>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        discovery: Arc<dyn Discovery>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            discovery,
            interval,
        }
    }

    /// One pass: start missing workers, stop stale ones
    ///
    /// Workers whose address is still discovered are left untouched. On a
    /// discovery failure the registry is not modified.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, DiscoveryError> {
        let desired = self.discovery.list_targets().await?;
        let mut report = ReconcileReport::default();

        for addr in &desired {
            if self.registry.start(addr).await {
                report.added.push(addr.clone());
            }
        }

        for addr in self.registry.addresses().await {
            if !desired.contains(&addr) && self.registry.stop(&addr).await {
                report.removed.push(addr);
            }
        }

        if !report.is_empty() {
            tracing::info!(
                added = ?report.added,
                removed = ?report.removed,
                "reconciled workers"
            );
        }
        Ok(report)
    }

    /// Reconcile on every tick until cancelled
    ///
    /// The first tick fires one interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        let err = Error::from(e);
                        tracing::warn!(
                            category = %err.category(),
                            error = %err,
                            "discovery failed, skipping reconcile"
                        );
                    }
                }
            }
        }

        tracing::debug!("reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::registry::WorkerSpawner;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    /// Discovery whose answer can be swapped between passes
    #[derive(Default)]
    struct ScriptedDiscovery {
        targets: Mutex<Option<Vec<String>>>,
    }

    impl ScriptedDiscovery {
        fn set(&self, targets: &[&str]) {
            *self.targets.lock().unwrap() = Some(targets.iter().map(|t| t.to_string()).collect());
        }

        fn fail(&self) {
            *self.targets.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl Discovery for ScriptedDiscovery {
        async fn list_targets(&self) -> Result<BTreeSet<String>, DiscoveryError> {
            match self.targets.lock().unwrap().clone() {
                Some(targets) => Ok(targets.into_iter().collect()),
                None => Err(DiscoveryError::Empty("scripted".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct TokenSpawner {
        spawned: Mutex<Vec<(String, CancellationToken)>>,
    }

    impl TokenSpawner {
        fn tokens(&self, addr: &str) -> Vec<CancellationToken> {
            self.spawned
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| a == addr)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    impl WorkerSpawner for TokenSpawner {
        fn spawn(&self, addr: &str, cancel: CancellationToken) -> JoinHandle<()> {
            self.spawned
                .lock()
                .unwrap()
                .push((addr.to_string(), cancel.clone()));
            tokio::spawn(async move { cancel.cancelled().await })
        }
    }

    fn setup() -> (Reconciler, Arc<ScriptedDiscovery>, Arc<TokenSpawner>, Arc<WorkerRegistry>) {
        let discovery = Arc::new(ScriptedDiscovery::default());
        let spawner = Arc::new(TokenSpawner::default());
        let registry = Arc::new(WorkerRegistry::new(
            spawner.clone(),
            CancellationToken::new(),
        ));
        let reconciler = Reconciler::new(
            registry.clone(),
            discovery.clone(),
            Duration::from_millis(7500),
        );
        (reconciler, discovery, spawner, registry)
    }

    #[tokio::test]
    async fn test_new_target_gets_worker_existing_untouched() {
        let (reconciler, discovery, spawner, registry) = setup();

        discovery.set(&["A"]);
        reconciler.reconcile_once().await.unwrap();

        discovery.set(&["A", "B"]);
        let report = reconciler.reconcile_once().await.unwrap();

        assert_eq!(report.added, vec!["B"]);
        assert!(report.removed.is_empty());
        assert_eq!(registry.addresses().await, vec!["A", "B"]);

        let a_tokens = spawner.tokens("A");
        assert_eq!(a_tokens.len(), 1);
        assert!(!a_tokens[0].is_cancelled());
    }

    #[tokio::test]
    async fn test_vanished_target_is_stopped() {
        let (reconciler, discovery, spawner, registry) = setup();

        discovery.set(&["A", "B"]);
        reconciler.reconcile_once().await.unwrap();

        discovery.set(&["A"]);
        let report = reconciler.reconcile_once().await.unwrap();

        assert_eq!(report.removed, vec!["B"]);
        assert!(spawner.tokens("B")[0].is_cancelled());
        assert!(!spawner.tokens("A")[0].is_cancelled());
        assert_eq!(registry.addresses().await, vec!["A"]);
    }

    #[tokio::test]
    async fn test_discovery_failure_keeps_workers() {
        let (reconciler, discovery, spawner, registry) = setup();

        discovery.set(&["A", "B"]);
        reconciler.reconcile_once().await.unwrap();

        discovery.fail();
        assert!(reconciler.reconcile_once().await.is_err());

        assert_eq!(registry.addresses().await, vec!["A", "B"]);
        assert!(!spawner.tokens("A")[0].is_cancelled());
    }

    #[tokio::test]
    async fn test_unchanged_targets_report_nothing() {
        let (reconciler, discovery, _spawner, _registry) = setup();

        discovery.set(&["A"]);
        reconciler.reconcile_once().await.unwrap();
        assert!(reconciler.reconcile_once().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reconciles_on_tick_and_stops_on_cancel() {
        let (reconciler, discovery, _spawner, registry) = setup();
        discovery.set(&["A"]);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconciler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty().await);

        tokio::time::sleep(Duration::from_millis(7500)).await;
        assert_eq!(registry.addresses().await, vec!["A"]);

        discovery.set(&["A", "B"]);
        tokio::time::sleep(Duration::from_millis(7500)).await;
        assert_eq!(registry.addresses().await, vec!["A", "B"]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
