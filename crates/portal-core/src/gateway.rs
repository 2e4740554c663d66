//! Chain gateway and wallet-config endpoint interfaces
//!
//! Gateway-classified calls are forwarded verbatim as JSON-RPC envelopes;
//! wallet-classified calls go to the wallet-config endpoint after approval.

use crate::types::RpcEnvelope;
#[cfg(feature = "http")]
use crate::Error;
use crate::{ChainId, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Transport to the blockchain gateway
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Forward a JSON-RPC envelope and return its `result` unchanged
    async fn request(&self, chain_id: ChainId, envelope: RpcEnvelope) -> Result<Value>;
}

/// Transport to the wallet-config HTTP endpoint
#[async_trait]
pub trait WalletEndpoint: Send + Sync {
    /// Forward an approved wallet method call
    async fn request(&self, chain_id: ChainId, envelope: RpcEnvelope) -> Result<Value>;
}

// ============================================================================
// HTTP implementations (requires http feature)
// ============================================================================

/// JSON-RPC response from the gateway
#[cfg(feature = "http")]
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Value,
    /// `Some(Value::Null)` for an explicit `"result": null`
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[cfg(feature = "http")]
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[cfg(feature = "http")]
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Value as serde::Deserialize>::deserialize(deserializer).map(Some)
}

#[cfg(feature = "http")]
impl RpcResponse {
    /// The result answering `envelope`
    pub fn into_result(self, envelope: &RpcEnvelope) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(Error::Gateway(format!(
                "{} failed with code {}: {}",
                envelope.method, error.code, error.message
            )));
        }
        if !self.id.is_null() && self.id != envelope.id {
            return Err(Error::Gateway(format!(
                "response id {} does not match request id {}",
                self.id, envelope.id
            )));
        }
        self.result
            .ok_or_else(|| Error::Gateway(format!("{} returned no result", envelope.method)))
    }
}

/// RPC URLs of one chain and the one that last answered
#[cfg(feature = "http")]
#[derive(Debug)]
struct ChainEndpoints {
    urls: Vec<String>,
    preferred: std::sync::atomic::AtomicUsize,
}

#[cfg(feature = "http")]
impl ChainEndpoints {
    fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            preferred: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Indexes to try, starting at the preferred URL
    fn rotation(&self) -> impl Iterator<Item = usize> + '_ {
        let len = self.urls.len();
        let start = self.preferred.load(std::sync::atomic::Ordering::Relaxed) % len.max(1);
        (0..len).map(move |offset| (start + offset) % len)
    }

    fn prefer(&self, index: usize) {
        self.preferred
            .store(index, std::sync::atomic::Ordering::Relaxed);
    }
}

/// JSON-RPC gateway client
///
/// Each chain fails over across its own URLs and sticks to the last one
/// that answered. A JSON-RPC error is the chain's answer and is not retried
/// elsewhere.
#[cfg(feature = "http")]
#[derive(Clone)]
pub struct HttpGateway {
    endpoints: std::sync::Arc<std::collections::HashMap<ChainId, ChainEndpoints>>,
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpGateway {
    /// Create a gateway client from per-chain RPC URLs
    pub fn new(urls: std::collections::HashMap<ChainId, Vec<String>>) -> Result<Self> {
        Self::with_timeout(urls, std::time::Duration::from_secs(30))
    }

    /// Create a gateway client with a custom request timeout
    pub fn with_timeout(
        urls: std::collections::HashMap<ChainId, Vec<String>>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let endpoints: std::collections::HashMap<_, _> = urls
            .into_iter()
            .filter(|(_, urls)| !urls.is_empty())
            .map(|(chain_id, urls)| (chain_id, ChainEndpoints::new(urls)))
            .collect();
        if endpoints.is_empty() {
            return Err(Error::InvalidConfig("At least one RPC URL required".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Gateway(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoints: std::sync::Arc::new(endpoints),
            client,
        })
    }

    /// Chains this gateway can serve
    pub fn chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<_> = self.endpoints.keys().copied().collect();
        chains.sort_unstable();
        chains
    }

    fn endpoints_for(&self, chain_id: ChainId) -> Result<&ChainEndpoints> {
        self.endpoints
            .get(&chain_id)
            .ok_or_else(|| Error::Gateway(format!("No RPC URL for chain {}", chain_id)))
    }

    /// Post the envelope; fails only when `url` gave no JSON-RPC response
    async fn post(&self, url: &str, envelope: &RpcEnvelope) -> Result<RpcResponse> {
        let response = self
            .client
            .post(url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("RPC request failed: {}", e)))?;

        response
            .json::<RpcResponse>()
            .await
            .map_err(|e| Error::Gateway(format!("Invalid RPC response: {}", e)))
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Gateway for HttpGateway {
    async fn request(&self, chain_id: ChainId, envelope: RpcEnvelope) -> Result<Value> {
        let endpoints = self.endpoints_for(chain_id)?;
        let mut last_error = None;

        for index in endpoints.rotation() {
            let url = &endpoints.urls[index];
            match self.post(url, &envelope).await {
                Ok(response) => {
                    endpoints.prefer(index);
                    return response.into_result(&envelope);
                }
                Err(e) => {
                    tracing::warn!(chain_id, url = %url, error = %e, "Gateway unreachable, trying next URL");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Gateway("All RPC endpoints failed".into())))
    }
}

#[cfg(feature = "http")]
impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("chains", &self.chains())
            .finish()
    }
}

/// Wallet-config endpoint over HTTP
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpWalletEndpoint {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpWalletEndpoint {
    /// Create a client for the endpoint at `url`
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::WalletEndpoint(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            api_key: None,
            client,
        })
    }

    /// Authenticate requests with a bearer token
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Build the request body for an envelope
    pub fn body(chain_id: ChainId, envelope: &RpcEnvelope) -> Value {
        serde_json::json!({
            "chainId": chain_id,
            "method": envelope.method,
            "params": envelope.params,
        })
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl WalletEndpoint for HttpWalletEndpoint {
    async fn request(&self, chain_id: ChainId, envelope: RpcEnvelope) -> Result<Value> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&Self::body(chain_id, &envelope));

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::WalletEndpoint(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::WalletEndpoint(format!(
                "Unexpected status {}",
                response.status()
            )));
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| Error::WalletEndpoint(e.to_string()))?;

        Ok(body.get_mut("result").map(Value::take).unwrap_or(body))
    }
}
