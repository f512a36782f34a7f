//! Cluster member discovery

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::DiscoveryConfig;

/// Discovery errors
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Name resolution failed
    #[error("failed to resolve {service}: {source}")]
    Resolve {
        service: String,
        #[source]
        source: std::io::Error,
    },

    /// Lookup succeeded but returned nothing
    #[error("no members found for {0}")]
    Empty(String),
}

/// Source of the desired set of node addresses
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Current member addresses
    async fn list_targets(&self) -> Result<BTreeSet<String>, DiscoveryError>;
}

/// Resolves a service host name to one address per IP
///
/// Pointed at a Kubernetes headless service, each pod IP becomes a member.
#[derive(Debug, Clone)]
pub struct DnsDiscovery {
    service: String,
    port: u16,
    scheme: String,
}

impl DnsDiscovery {
    /// Create a resolver for `service`
    pub fn new(service: impl Into<String>, port: u16, scheme: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            port,
            scheme: scheme.into(),
        }
    }

    /// Build from configuration
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(&config.service, config.port, &config.scheme)
    }

    /// Member address for `ip`
    pub fn member_addr(&self, ip: IpAddr) -> String {
        match ip {
            IpAddr::V4(v4) => format!("{}://{}:{}", self.scheme, v4, self.port),
            IpAddr::V6(v6) => format!("{}://[{}]:{}", self.scheme, v6, self.port),
        }
    }
}

#[async_trait]
impl Discovery for DnsDiscovery {
    async fn list_targets(&self) -> Result<BTreeSet<String>, DiscoveryError> {
        let resolved = tokio::net::lookup_host((self.service.as_str(), self.port))
            .await
            .map_err(|source| DiscoveryError::Resolve {
                service: self.service.clone(),
                source,
            })?;

        let targets: BTreeSet<String> = resolved.map(|sa| self.member_addr(sa.ip())).collect();
        if targets.is_empty() {
            return Err(DiscoveryError::Empty(self.service.clone()));
        }
        Ok(targets)
    }
}

/// Adds statically configured nodes to another discovery source
///
/// Static nodes are only reported when the inner source succeeds, so a
/// discovery outage never shrinks the desired set.
pub struct WithStaticNodes {
    inner: Arc<dyn Discovery>,
    nodes: BTreeSet<String>,
}

impl WithStaticNodes {
    pub fn new(inner: Arc<dyn Discovery>, nodes: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner,
            nodes: nodes.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Discovery for WithStaticNodes {
    async fn list_targets(&self) -> Result<BTreeSet<String>, DiscoveryError> {
        let mut targets = self.inner.list_targets().await?;
        targets.extend(self.nodes.iter().cloned());
        Ok(targets)
    }
}
