//! Events emitted and consumed by the request router

use crate::bus::BusEvent;
use crate::types::RequestPayload;

/// Event published on the provider's bus
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// The provider is ready to serve requests
    Connect { chain_id: String },
    /// The active chain changed; carries the hex-encoded chain id
    ChainChanged { chain_id: String },
    /// A request waits for an approval decision
    SigningRequested(RequestPayload),
    /// The host app approved a pending request
    SigningApproved(RequestPayload),
    /// The host app rejected a pending request
    SigningRejected(RequestPayload),
}

/// Kind tag of a [`ProviderEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    Connect,
    ChainChanged,
    SigningRequested,
    SigningApproved,
    SigningRejected,
}

impl ProviderEventKind {
    /// Wire-style name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEventKind::Connect => "connect",
            ProviderEventKind::ChainChanged => "chainChanged",
            ProviderEventKind::SigningRequested => "signingRequested",
            ProviderEventKind::SigningApproved => "signingApproved",
            ProviderEventKind::SigningRejected => "signingRejected",
        }
    }
}

impl BusEvent for ProviderEvent {
    type Kind = ProviderEventKind;

    fn kind(&self) -> ProviderEventKind {
        match self {
            ProviderEvent::Connect { .. } => ProviderEventKind::Connect,
            ProviderEvent::ChainChanged { .. } => ProviderEventKind::ChainChanged,
            ProviderEvent::SigningRequested(_) => ProviderEventKind::SigningRequested,
            ProviderEvent::SigningApproved(_) => ProviderEventKind::SigningApproved,
            ProviderEvent::SigningRejected(_) => ProviderEventKind::SigningRejected,
        }
    }
}

impl ProviderEvent {
    /// Request payload carried by approval events
    pub fn payload(&self) -> Option<&RequestPayload> {
        match self {
            ProviderEvent::SigningRequested(p)
            | ProviderEvent::SigningApproved(p)
            | ProviderEvent::SigningRejected(p) => Some(p),
            _ => None,
        }
    }
}
