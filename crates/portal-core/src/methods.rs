//! Method classification
//!
//! Every inbound call is routed by method name into one of three buckets.
//! The buckets are checked in a fixed order: signer methods first, then
//! wallet methods, then the chain RPC namespace.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Methods that need the signing share and an approval
pub const SIGNER_METHODS: &[&str] = &[
    "eth_accounts",
    "eth_requestAccounts",
    "eth_sendTransaction",
    "eth_sign",
    "eth_signTransaction",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
    "personal_sign",
];

/// Methods handled by the wallet-config endpoint
pub const WALLET_METHODS: &[&str] = &[
    "wallet_addEthereumChain",
    "wallet_getPermissions",
    "wallet_registerOnboarding",
    "wallet_requestPermissions",
    "wallet_switchEthereumChain",
    "wallet_watchAsset",
];

/// Default namespace prefix for calls forwarded to the chain gateway
pub const DEFAULT_GATEWAY_NAMESPACE: &str = "eth_";

/// Routing destination of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodClass {
    /// Approval gate, then the signing capability
    Signer,
    /// Approval gate, then the wallet-config endpoint
    Wallet,
    /// Forwarded verbatim to the chain gateway
    Gateway,
}

impl MethodClass {
    /// Check if calls of this class pass through the approval gate
    pub fn requires_approval(&self) -> bool {
        matches!(self, MethodClass::Signer | MethodClass::Wallet)
    }
}

/// Classify a method name
pub fn classify(method: &str, gateway_namespace: &str) -> Result<MethodClass> {
    if SIGNER_METHODS.contains(&method) {
        Ok(MethodClass::Signer)
    } else if WALLET_METHODS.contains(&method) {
        Ok(MethodClass::Wallet)
    } else if !gateway_namespace.is_empty() && method.starts_with(gateway_namespace) {
        Ok(MethodClass::Gateway)
    } else {
        Err(Error::UnsupportedMethod(method.to_string()))
    }
}
