//! Common test utilities

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use vault_unseal::cluster::{Discovery, DiscoveryError};
use vault_unseal::config::Config;
use vault_unseal::notifications::channels::{ChannelResult, DeliveryStatus};
use vault_unseal::notifications::{Channel, Report};
use vault_unseal::vault::{SealApi, SealError, SealResult, SealStatus};

/// How a fake node answers status checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum NodeBehavior {
    Unsealed,
    Failing,
}

/// In-memory seal API with per-address behavior and call counting
#[derive(Default)]
pub struct FakeCluster {
    behavior: Mutex<HashMap<String, NodeBehavior>>,
    checks: Mutex<HashMap<String, usize>>,
}

#[allow(dead_code)]
impl FakeCluster {
    pub fn with_node(self, addr: &str, behavior: NodeBehavior) -> Self {
        self.behavior
            .lock()
            .unwrap()
            .insert(addr.to_string(), behavior);
        self
    }

    pub fn checks(&self, addr: &str) -> usize {
        self.checks.lock().unwrap().get(addr).copied().unwrap_or(0)
    }

    pub fn total_checks(&self) -> usize {
        self.checks.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl SealApi for FakeCluster {
    async fn check_status(&self, addr: &str) -> SealResult<SealStatus> {
        *self
            .checks
            .lock()
            .unwrap()
            .entry(addr.to_string())
            .or_default() += 1;

        let behavior = self
            .behavior
            .lock()
            .unwrap()
            .get(addr)
            .copied()
            .unwrap_or(NodeBehavior::Unsealed);

        match behavior {
            NodeBehavior::Unsealed => Ok(SealStatus::unsealed()),
            NodeBehavior::Failing => Err(SealError::Status {
                addr: addr.to_string(),
                status: 503,
                body: "Vault is sealed".to_string(),
            }),
        }
    }

    async fn unseal(&self, _addr: &str, _token: &str) -> SealResult<SealStatus> {
        Ok(SealStatus::unsealed())
    }
}

/// Discovery whose answer can be changed while the daemon runs
#[derive(Default)]
pub struct SwitchableDiscovery {
    targets: Mutex<Option<Vec<String>>>,
}

#[allow(dead_code)]
impl SwitchableDiscovery {
    pub fn set(&self, targets: &[&str]) {
        *self.targets.lock().unwrap() = Some(targets.iter().map(|t| t.to_string()).collect());
    }
}

#[async_trait]
impl Discovery for SwitchableDiscovery {
    async fn list_targets(&self) -> Result<BTreeSet<String>, DiscoveryError> {
        match self.targets.lock().unwrap().clone() {
            Some(targets) => Ok(targets.into_iter().collect()),
            None => Err(DiscoveryError::Empty("switchable".to_string())),
        }
    }
}

/// Channel that keeps every report it is handed
#[derive(Clone, Default)]
pub struct RecordingChannel {
    reports: Arc<Mutex<Vec<Report>>>,
}

#[allow(dead_code)]
impl RecordingChannel {
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn event_total(&self) -> usize {
        self.reports().iter().map(|r| r.event_count).sum()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, report: &Report) -> ChannelResult<DeliveryStatus> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(DeliveryStatus::success("recording"))
    }
}

/// A validated single-node config with notifications switched on
#[allow(dead_code)]
pub fn test_config(nodes: &[&str]) -> Config {
    let mut config = Config {
        environment: "test".to_string(),
        check_interval_secs: 5,
        max_check_interval_secs: 60,
        allow_single_node: true,
        nodes: nodes.iter().map(|n| n.to_string()).collect(),
        tokens: vec!["share-1".to_string()],
        ..Config::default()
    };
    config.validate().expect("test config is valid");

    config.notifications.enabled = true;
    config.notifications.queue_delay_secs = 10;
    config.notifications.max_elapsed_secs = 600;
    config
}
