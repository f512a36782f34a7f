//! Worker registry
//!
//! Owns the live set of endpoint watchers keyed by address together with the
//! cancellation token and task handle of each. The reconciler and the daemon's
//! static startup mutate it; watchers only observe their own token.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigRx;
use crate::notifications::Notifier;
use crate::vault::SealApi;
use crate::watcher::EndpointWatcher;

/// Starts the task that supervises one address
pub trait WorkerSpawner: Send + Sync {
    /// Spawn a worker for `addr` that exits once `cancel` fires
    fn spawn(&self, addr: &str, cancel: CancellationToken) -> JoinHandle<()>;
}

/// Spawns an [`EndpointWatcher`] per address
#[derive(Clone)]
pub struct WatcherSpawner {
    api: Arc<dyn SealApi>,
    config: ConfigRx,
    notifier: Notifier,
}

impl WatcherSpawner {
    pub fn new(api: Arc<dyn SealApi>, config: ConfigRx, notifier: Notifier) -> Self {
        Self {
            api,
            config,
            notifier,
        }
    }
}

impl WorkerSpawner for WatcherSpawner {
    fn spawn(&self, addr: &str, cancel: CancellationToken) -> JoinHandle<()> {
        let watcher = EndpointWatcher::new(
            addr,
            self.api.clone(),
            self.config.clone(),
            self.notifier.clone(),
        );
        tracing::debug!(addr = watcher.addr(), "spawning watcher");
        tokio::spawn(watcher.run(cancel))
    }
}

/// Handle to one running worker
#[derive(Debug)]
struct WorkerHandle {
    address: String,
    cancel: CancellationToken,
    /// Taken while the worker is being stopped
    task: Option<JoinHandle<()>>,
}

/// Registry of live workers keyed by address
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, WorkerHandle>>,
    spawner: Arc<dyn WorkerSpawner>,
    root: CancellationToken,
}

impl WorkerRegistry {
    /// Create an empty registry
    ///
    /// Every worker token is a child of `root`, so cancelling `root` stops
    /// all of them.
    pub fn new(spawner: Arc<dyn WorkerSpawner>, root: CancellationToken) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            spawner,
            root,
        }
    }

    /// Start a worker for `addr` unless one is already registered
    ///
    /// Returns `true` if a worker was started.
    pub async fn start(&self, addr: &str) -> bool {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(addr) || self.root.is_cancelled() {
            return false;
        }

        let cancel = self.root.child_token();
        let task = self.spawner.spawn(addr, cancel.clone());
        workers.insert(
            addr.to_string(),
            WorkerHandle {
                address: addr.to_string(),
                cancel,
                task: Some(task),
            },
        );

        tracing::info!(addr = %addr, "invoking worker");
        true
    }

    /// Stop the worker for `addr` and deregister it once it has exited
    ///
    /// The entry stays registered while the worker drains, so a concurrent
    /// [`Self::start`] for the same address is a no-op. Returns `false` if no
    /// worker was registered or a stop was already in progress.
    pub async fn stop(&self, addr: &str) -> bool {
        let (cancel, task) = {
            let mut workers = self.workers.lock().await;
            let Some(handle) = workers.get_mut(addr) else {
                return false;
            };
            let Some(task) = handle.task.take() else {
                return false;
            };
            (handle.cancel.clone(), task)
        };

        tracing::info!(addr = %addr, "removing worker");
        cancel.cancel();
        if let Err(e) = task.await {
            tracing::warn!(addr = %addr, error = %e, "worker exited abnormally");
        }

        self.workers.lock().await.remove(addr);
        true
    }

    /// Point-in-time snapshot of registered addresses, sorted
    pub async fn addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Whether `addr` is registered
    pub async fn contains(&self, addr: &str) -> bool {
        self.workers.lock().await.contains_key(addr)
    }

    /// Number of registered workers
    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Whether no worker is registered
    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }

    /// Cancel every worker, wait for all of them and clear the registry
    ///
    /// No worker can be started afterwards.
    pub async fn shutdown(&self) {
        self.root.cancel();

        let tasks: Vec<(String, JoinHandle<()>)> = {
            let mut workers = self.workers.lock().await;
            workers
                .values_mut()
                .filter_map(|h| h.task.take().map(|t| (h.address.clone(), t)))
                .collect()
        };

        tracing::info!(workers = tasks.len(), "waiting for workers to exit");
        let (addrs, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        for (addr, result) in addrs.iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                tracing::warn!(addr = %addr, error = %e, "worker exited abnormally");
            }
        }

        self.workers.lock().await.clear();
    }
}
