//! Signing capability and share storage interfaces
//!
//! The cryptography behind a signature lives outside this crate. The router
//! only needs two narrow capabilities:
//!
//! - [`Signer`]: turns a method, its params, the chain and an opaque share
//!   reference into a signature (or account list)
//! - [`ShareStore`]: hands out the opaque share reference and the wallet
//!   address it belongs to

use crate::{ChainId, Error, Result, SigningError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Opaque reference to the device's signing share
///
/// The contents are never inspected or logged by this crate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShareRef(String);

impl KeyShareRef {
    /// Wrap an opaque share reference
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw reference for the signer
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyShareRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyShareRef(<redacted>)")
    }
}

/// Everything the signer needs for one call
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub method: String,
    pub params: Vec<Value>,
    pub chain_id: ChainId,
    pub share: KeyShareRef,
}

/// Successful output of the signing capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignerResponse {
    /// A hex-encoded signature or transaction hash
    Signature(String),
    /// Account addresses (`eth_accounts`, `eth_requestAccounts`)
    Accounts(Vec<String>),
}

impl SignerResponse {
    /// JSON value returned to the caller of `route`
    pub fn into_value(self) -> Value {
        match self {
            SignerResponse::Signature(sig) => Value::String(sig),
            SignerResponse::Accounts(accounts) => {
                Value::Array(accounts.into_iter().map(Value::String).collect())
            }
        }
    }
}

/// External signing capability
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign (or otherwise answer) a signer-classified request
    async fn sign(&self, request: SigningRequest) -> std::result::Result<SignerResponse, SigningError>;
}

/// Access to the signing share and the wallet address
#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Load the signing share reference
    async fn signing_share(&self) -> Result<KeyShareRef>;

    /// Wallet address derived from the share
    async fn address(&self) -> Result<String>;
}

/// Stored share entry
#[derive(Debug, Clone)]
struct StoredShare {
    share: KeyShareRef,
    address: String,
}

/// In-memory share store for testing and local development
#[derive(Debug, Clone, Default)]
pub struct MemoryShareStore {
    shares: Arc<RwLock<HashMap<&'static str, StoredShare>>>,
}

impl MemoryShareStore {
    const SIGNING: &'static str = "signing";

    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding a share
    pub async fn with_share(share: KeyShareRef, address: impl Into<String>) -> Self {
        let store = Self::new();
        store.store(share, address).await;
        store
    }

    /// Replace the signing share
    pub async fn store(&self, share: KeyShareRef, address: impl Into<String>) {
        self.shares.write().await.insert(
            Self::SIGNING,
            StoredShare {
                share,
                address: address.into(),
            },
        );
    }

    /// Remove the signing share
    pub async fn clear(&self) {
        self.shares.write().await.clear();
    }
}

#[async_trait]
impl ShareStore for MemoryShareStore {
    async fn signing_share(&self) -> Result<KeyShareRef> {
        self.shares
            .read()
            .await
            .get(Self::SIGNING)
            .map(|s| s.share.clone())
            .ok_or_else(|| Error::ShareNotFound(Self::SIGNING.to_string()))
    }

    async fn address(&self) -> Result<String> {
        self.shares
            .read()
            .await
            .get(Self::SIGNING)
            .map(|s| s.address.clone())
            .ok_or_else(|| Error::ShareNotFound(Self::SIGNING.to_string()))
    }
}
