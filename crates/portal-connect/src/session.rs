//! Dapp session state and session proposals

use chrono::{DateTime, Utc};
use portal_core::ChainId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Namespace holding EVM chains in a proposal
pub const EIP155_NAMESPACE: &str = "eip155";

/// Metadata describing the connected dapp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// An established, topic-identified relationship with a dapp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: String,
    pub chain_id: ChainId,
    pub peer_metadata: Option<PeerMetadata>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    /// Create a session established now
    pub fn new(
        topic: impl Into<String>,
        chain_id: ChainId,
        peer_metadata: Option<PeerMetadata>,
    ) -> Self {
        Self {
            topic: topic.into(),
            chain_id,
            peer_metadata,
            connected_at: Utc::now(),
        }
    }
}

/// Chains, methods and events requested for one namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Session proposal sent by a dapp
///
/// Fields other than the namespaces are carried through untouched so the
/// approval echoes the proposal back as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    pub required_namespaces: BTreeMap<String, Namespace>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_namespaces: BTreeMap<String, Namespace>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionProposal {
    /// EVM chains the dapp asked for, required first, without duplicates
    pub fn requested_chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = Vec::new();
        let namespaces = [&self.required_namespaces, &self.optional_namespaces];
        for chain in namespaces
            .iter()
            .filter_map(|n| n.get(EIP155_NAMESPACE))
            .flat_map(|n| n.chains.iter())
        {
            if !chains.contains(chain) {
                chains.push(chain.clone());
            }
        }
        chains
    }

    /// Merge locally configured chains into the proposal
    ///
    /// The required `eip155` namespace ends up with the union of the chains
    /// the dapp requested and `local`, in that order.
    pub fn with_local_chains(mut self, local: &[ChainId]) -> Self {
        let mut chains = self.requested_chains();
        for id in local {
            let chain = format!("{}:{}", EIP155_NAMESPACE, id);
            if !chains.contains(&chain) {
                chains.push(chain);
            }
        }

        self.required_namespaces
            .entry(EIP155_NAMESPACE.to_string())
            .or_default()
            .chains = chains;
        self
    }
}
