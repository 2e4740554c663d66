//! Core request types shared by the router and the relay client

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier correlating a request with its approval and result
pub type RequestId = String;

/// Chain identifier (EIP-155 numeric id)
pub type ChainId = u64;

/// Sepolia testnet, the default chain for a fresh provider
pub const DEFAULT_CHAIN_ID: ChainId = 11_155_111;

/// A wallet-facing JSON-RPC style call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Correlation id
    pub id: RequestId,
    /// JSON-RPC method name
    pub method: String,
    /// Positional parameters
    pub params: Vec<Value>,
    /// Target chain; `None` uses the provider's current chain
    pub chain_id: Option<ChainId>,
}

impl RequestPayload {
    /// Create a payload with a fresh id
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
            chain_id: None,
        }
    }

    /// Use a caller-supplied correlation id
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = id.into();
        self
    }

    /// Target an explicit chain
    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }
}

/// JSON-RPC 2.0 request envelope sent to the chain gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcEnvelope {
    /// Wrap a payload's method and params verbatim
    pub fn from_payload(payload: &RequestPayload) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Value::String(payload.id.clone()),
            method: payload.method.clone(),
            params: payload.params.clone(),
        }
    }
}

/// Encode a chain id the way `chainChanged` carries it (`5` -> `"0x5"`)
pub fn chain_id_hex(chain_id: ChainId) -> String {
    format!("{:#x}", chain_id)
}

/// Parse a chain id given as a number, decimal string, hex string or
/// CAIP-2 identifier (`eip155:1`)
pub fn parse_chain_id(value: &Value) -> Option<ChainId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_chain_id_str(s),
        _ => None,
    }
}

fn parse_chain_id_str(s: &str) -> Option<ChainId> {
    let s = s.trim();
    let s = s.strip_prefix("eip155:").unwrap_or(s);

    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => ChainId::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}
