//! Seal-status capability
//!
//! This module defines the [`SealApi`] seam the watchers talk to and a
//! [`VaultClient`] implementation backed by the Vault HTTP API.
//!
//! # Endpoints
//!
//! - `GET  {addr}/v1/sys/seal-status`
//! - `PUT  {addr}/v1/sys/unseal` with body `{"key": "<share>"}`
//!
//! Both return the same seal status document, so an unseal response tells the
//! caller whether quorum has been reached.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Seal state reported by a Vault node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealStatus {
    /// Whether the node is sealed
    pub sealed: bool,

    /// Shares submitted toward the current unseal attempt
    #[serde(default)]
    pub progress: u32,

    /// Shares required to unseal
    #[serde(rename = "t", default)]
    pub threshold: u32,

    /// Total shares the root key was split into
    #[serde(rename = "n", default)]
    pub shares: u32,
}

impl SealStatus {
    /// Status of an unsealed node
    pub fn unsealed() -> Self {
        Self {
            sealed: false,
            progress: 0,
            threshold: 0,
            shares: 0,
        }
    }

    /// Status of a sealed node with the given progress
    pub fn sealed(progress: u32, threshold: u32) -> Self {
        Self {
            sealed: true,
            progress,
            threshold,
            shares: threshold,
        }
    }
}

impl std::fmt::Display for SealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.sealed {
            write!(f, "sealed ({}/{})", self.progress, self.threshold)
        } else {
            write!(f, "unsealed")
        }
    }
}

/// Errors returned by the seal-status capability
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    /// The request did not complete within the client timeout
    #[error("request to {addr} timed out")]
    Timeout { addr: String },

    /// Connection or protocol failure
    #[error("request to {addr} failed: {source}")]
    Transport {
        addr: String,
        #[source]
        source: reqwest::Error,
    },

    /// Node answered with a non-success HTTP status
    #[error("{addr} returned HTTP {status}: {body}")]
    Status {
        addr: String,
        status: u16,
        body: String,
    },

    /// Response body was not a seal status document
    #[error("invalid seal status from {addr}: {reason}")]
    Decode { addr: String, reason: String },

    /// Address could not be turned into a request URL
    #[error("invalid node address {0:?}")]
    InvalidAddress(String),
}

impl SealError {
    /// Whether this failure is a transient network timeout
    ///
    /// Watchers suppress the first consecutive failure of this kind.
    pub fn is_transient_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn from_reqwest(addr: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                addr: addr.to_string(),
            }
        } else if err.is_decode() {
            Self::Decode {
                addr: addr.to_string(),
                reason: err.to_string(),
            }
        } else {
            Self::Transport {
                addr: addr.to_string(),
                source: err,
            }
        }
    }
}

/// Result type for seal operations
pub type SealResult<T> = Result<T, SealError>;

/// Check and unseal a node
#[async_trait]
pub trait SealApi: Send + Sync {
    /// Fetch the current seal status of `addr`
    async fn check_status(&self, addr: &str) -> SealResult<SealStatus>;

    /// Submit a single unseal share to `addr`
    async fn unseal(&self, addr: &str, token: &str) -> SealResult<SealStatus>;
}

#[derive(Serialize)]
struct UnsealRequest<'a> {
    key: &'a str,
}

/// Vault HTTP client
///
/// A single client is shared by every watcher. Requests are never retried:
/// the watcher loop is the retry mechanism.
#[derive(Clone)]
pub struct VaultClient {
    client: Client,
}

impl VaultClient {
    /// Create a client with the given timeout
    pub fn new(timeout: Duration, tls_skip_verify: bool) -> SealResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(tls_skip_verify)
            .user_agent(concat!("vault-unseal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SealError::Transport {
                addr: String::new(),
                source: e,
            })?;

        Ok(Self { client })
    }

    fn endpoint(addr: &str, path: &str) -> SealResult<String> {
        let base = addr.trim().trim_end_matches('/');
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(SealError::InvalidAddress(addr.to_string()));
        }
        Ok(format!("{base}{path}"))
    }

    async fn decode(addr: &str, response: reqwest::Response) -> SealResult<SealStatus> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(SealError::Status {
                addr: addr.to_string(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        response
            .json::<SealStatus>()
            .await
            .map_err(|e| SealError::from_reqwest(addr, e))
    }
}

#[async_trait]
impl SealApi for VaultClient {
    async fn check_status(&self, addr: &str) -> SealResult<SealStatus> {
        let url = Self::endpoint(addr, "/v1/sys/seal-status")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SealError::from_reqwest(addr, e))?;

        Self::decode(addr, response).await
    }

    async fn unseal(&self, addr: &str, token: &str) -> SealResult<SealStatus> {
        let url = Self::endpoint(addr, "/v1/sys/unseal")?;
        let response = self
            .client
            .put(url)
            .json(&UnsealRequest { key: token })
            .send()
            .await
            .map_err(|e| SealError::from_reqwest(addr, e))?;

        Self::decode(addr, response).await
    }
}
