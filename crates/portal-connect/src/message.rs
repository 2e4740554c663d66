//! Relay wire messages
//!
//! Every frame is a JSON object `{ "event": <string>, "data": <object> }`.
//! Inbound frames decode into a [`RelayFrame`] through an ordered candidate
//! table: a frame naming a known event is only tried against the candidates
//! accepting that name, while frames with an unknown or missing event fall
//! back to structural matching in table order. The frame is keyed by its own
//! `event` name; the payload keeps the shape it decoded as. Outbound frames
//! are built from [`OutboundMessage`].

use crate::error::{ConnectError, Result};
use crate::session::{PeerMetadata, SessionProposal};
use portal_core::{ChainId, RequestId, RequestPayload, parse_chain_id};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

// ============================================================================
// Inbound payloads
// ============================================================================

/// Request ids arrive as JSON strings or numbers
fn request_id<'de, D>(deserializer: D) -> std::result::Result<RequestId, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("invalid request id: {}", other))),
    }
}

/// Handshake data, sent by the client and echoed by some relays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectData {
    pub address: String,
    pub chain_id: ChainId,
    pub uri: String,
}

/// Session established, with typed peer metadata
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedV1Data {
    pub topic: String,
    pub peer_metadata: PeerMetadata,
}

/// Session established, legacy shape
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedData {
    pub topic: String,
    pub peer_metadata: Value,
}

impl ConnectedData {
    /// Peer metadata, when it has the expected shape
    pub fn metadata(&self) -> Option<PeerMetadata> {
        PeerMetadata::deserialize(&self.peer_metadata).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DisconnectedData {
    pub topic: String,
}

/// Error reported by the relay
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorData {
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// JSON-RPC call carried by a session request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcCall<P> {
    pub method: String,
    pub params: P,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams<P> {
    #[serde(default)]
    pub chain_id: Option<Value>,
    pub request: RpcCall<P>,
}

/// A dapp request to be routed through the provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionRequestData<P> {
    #[serde(deserialize_with = "request_id")]
    pub id: RequestId,
    pub topic: String,
    pub params: SessionRequestParams<P>,
}

/// Transaction object of `eth_sendTransaction` style requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParams {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Dapp session proposal awaiting approval
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DappSessionRequestData {
    #[serde(deserialize_with = "request_id")]
    pub id: RequestId,
    pub topic: String,
    pub params: SessionProposal,
}

// ============================================================================
// Relay messages
// ============================================================================

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Connect(ConnectData),
    ConnectedV1(ConnectedV1Data),
    Connected(ConnectedData),
    Disconnected(DisconnectedData),
    Close,
    SessionRequest(SessionRequestData<Vec<Value>>),
    SessionRequestAddress(SessionRequestData<Vec<String>>),
    SessionRequestTransaction(SessionRequestData<Vec<TransactionParams>>),
    DappSessionRequested(DappSessionRequestData),
    Error(ErrorData),
}

/// Kind tag of a [`RelayMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayMessageKind {
    Connect,
    ConnectedV1,
    Connected,
    Disconnected,
    Close,
    SessionRequest,
    SessionRequestAddress,
    SessionRequestTransaction,
    DappSessionRequested,
    Error,
}

impl RelayMessageKind {
    /// Every session request variant
    pub const SESSION_REQUESTS: [RelayMessageKind; 3] = [
        RelayMessageKind::SessionRequest,
        RelayMessageKind::SessionRequestAddress,
        RelayMessageKind::SessionRequestTransaction,
    ];

    /// Kind named by a wire `event` field
    pub fn from_event(event: &str) -> Option<Self> {
        let kind = match event {
            "connect" => RelayMessageKind::Connect,
            "connectedV1" => RelayMessageKind::ConnectedV1,
            "connected" => RelayMessageKind::Connected,
            "disconnected" | "disconnect" => RelayMessageKind::Disconnected,
            "close" => RelayMessageKind::Close,
            "session_request" => RelayMessageKind::SessionRequest,
            "session_request_address" => RelayMessageKind::SessionRequestAddress,
            "session_request_transaction" => RelayMessageKind::SessionRequestTransaction,
            "portal_dappSessionRequested" | "dappSessionRequested" => {
                RelayMessageKind::DappSessionRequested
            }
            "error" => RelayMessageKind::Error,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayMessageKind::Connect => "connect",
            RelayMessageKind::ConnectedV1 => "connectedV1",
            RelayMessageKind::Connected => "connected",
            RelayMessageKind::Disconnected => "disconnected",
            RelayMessageKind::Close => "close",
            RelayMessageKind::SessionRequest => "session_request",
            RelayMessageKind::SessionRequestAddress => "session_request_address",
            RelayMessageKind::SessionRequestTransaction => "session_request_transaction",
            RelayMessageKind::DappSessionRequested => "portal_dappSessionRequested",
            RelayMessageKind::Error => "error",
        }
    }
}

/// A session request flattened for routing
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub id: RequestId,
    pub topic: String,
    pub method: String,
    pub params: Vec<Value>,
    pub chain_id: Option<ChainId>,
}

impl InboundRequest {
    /// Build the provider payload, defaulting the chain to `default_chain`
    pub fn to_payload(&self, default_chain: ChainId) -> RequestPayload {
        RequestPayload::new(self.method.clone(), self.params.clone())
            .with_id(self.id.clone())
            .with_chain_id(self.chain_id.unwrap_or(default_chain))
    }
}

impl<P> SessionRequestData<P> {
    fn flatten(&self, params: Vec<Value>) -> InboundRequest {
        InboundRequest {
            id: self.id.clone(),
            topic: self.topic.clone(),
            method: self.params.request.method.clone(),
            params,
            chain_id: self.params.chain_id.as_ref().and_then(parse_chain_id),
        }
    }
}

impl RelayMessage {
    /// Kind of the schema this payload decoded as
    pub fn shape(&self) -> RelayMessageKind {
        match self {
            RelayMessage::Connect(_) => RelayMessageKind::Connect,
            RelayMessage::ConnectedV1(_) => RelayMessageKind::ConnectedV1,
            RelayMessage::Connected(_) => RelayMessageKind::Connected,
            RelayMessage::Disconnected(_) => RelayMessageKind::Disconnected,
            RelayMessage::Close => RelayMessageKind::Close,
            RelayMessage::SessionRequest(_) => RelayMessageKind::SessionRequest,
            RelayMessage::SessionRequestAddress(_) => RelayMessageKind::SessionRequestAddress,
            RelayMessage::SessionRequestTransaction(_) => {
                RelayMessageKind::SessionRequestTransaction
            }
            RelayMessage::DappSessionRequested(_) => RelayMessageKind::DappSessionRequested,
            RelayMessage::Error(_) => RelayMessageKind::Error,
        }
    }

    /// The request carried by any session request variant
    pub fn session_request(&self) -> Option<InboundRequest> {
        match self {
            RelayMessage::SessionRequest(data) => {
                Some(data.flatten(data.params.request.params.clone()))
            }
            RelayMessage::SessionRequestAddress(data) => Some(
                data.flatten(
                    data.params
                        .request
                        .params
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            ),
            RelayMessage::SessionRequestTransaction(data) => Some(
                data.flatten(
                    data.params
                        .request
                        .params
                        .iter()
                        .filter_map(|tx| serde_json::to_value(tx).ok())
                        .collect(),
                ),
            ),
            _ => None,
        }
    }

    /// Topic of a newly established session and its peer metadata
    pub fn established(&self) -> Option<(&str, Option<PeerMetadata>)> {
        match self {
            RelayMessage::ConnectedV1(data) => {
                Some((data.topic.as_str(), Some(data.peer_metadata.clone())))
            }
            RelayMessage::Connected(data) => Some((data.topic.as_str(), data.metadata())),
            _ => None,
        }
    }
}

/// A decoded inbound frame, keyed by its wire event
#[derive(Debug, Clone, PartialEq)]
pub struct RelayFrame {
    kind: RelayMessageKind,
    message: RelayMessage,
}

impl RelayFrame {
    /// Key a decoded payload by the frame's `event` name, or by its shape
    /// when the name is missing or unknown
    pub fn new(event: Option<&str>, message: RelayMessage) -> Self {
        let kind = event
            .and_then(RelayMessageKind::from_event)
            .unwrap_or_else(|| message.shape());
        Self { kind, message }
    }

    pub fn kind(&self) -> RelayMessageKind {
        self.kind
    }

    pub fn message(&self) -> &RelayMessage {
        &self.message
    }

    pub fn into_message(self) -> RelayMessage {
        self.message
    }
}

// ============================================================================
// Decoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

type DecodeFn = fn(&Value) -> serde_json::Result<RelayMessage>;

struct Candidate {
    kind: RelayMessageKind,
    events: &'static [&'static str],
    structural: bool,
    decode: DecodeFn,
}

/// Candidates in priority order
fn candidates() -> [Candidate; 10] {
    [
        Candidate {
            kind: RelayMessageKind::ConnectedV1,
            events: &["connectedV1", "connected"],
            structural: true,
            decode: |data| ConnectedV1Data::deserialize(data).map(RelayMessage::ConnectedV1),
        },
        Candidate {
            kind: RelayMessageKind::Connected,
            events: &["connected"],
            structural: true,
            decode: |data| ConnectedData::deserialize(data).map(RelayMessage::Connected),
        },
        Candidate {
            kind: RelayMessageKind::SessionRequestAddress,
            events: &["session_request", "session_request_address"],
            structural: true,
            decode: |data| {
                SessionRequestData::<Vec<String>>::deserialize(data)
                    .map(RelayMessage::SessionRequestAddress)
            },
        },
        Candidate {
            kind: RelayMessageKind::SessionRequestTransaction,
            events: &["session_request", "session_request_transaction"],
            structural: true,
            decode: |data| {
                SessionRequestData::<Vec<TransactionParams>>::deserialize(data)
                    .map(RelayMessage::SessionRequestTransaction)
            },
        },
        Candidate {
            kind: RelayMessageKind::SessionRequest,
            events: &[
                "session_request",
                "session_request_address",
                "session_request_transaction",
            ],
            structural: true,
            decode: |data| {
                SessionRequestData::<Vec<Value>>::deserialize(data)
                    .map(RelayMessage::SessionRequest)
            },
        },
        Candidate {
            kind: RelayMessageKind::DappSessionRequested,
            events: &["portal_dappSessionRequested", "dappSessionRequested"],
            structural: true,
            decode: |data| {
                DappSessionRequestData::deserialize(data).map(RelayMessage::DappSessionRequested)
            },
        },
        Candidate {
            kind: RelayMessageKind::Connect,
            events: &["connect"],
            structural: true,
            decode: |data| ConnectData::deserialize(data).map(RelayMessage::Connect),
        },
        Candidate {
            kind: RelayMessageKind::Disconnected,
            events: &["disconnected", "disconnect"],
            structural: false,
            decode: |data| DisconnectedData::deserialize(data).map(RelayMessage::Disconnected),
        },
        Candidate {
            kind: RelayMessageKind::Error,
            events: &["error"],
            structural: true,
            decode: |data| ErrorData::deserialize(data).map(RelayMessage::Error),
        },
        Candidate {
            kind: RelayMessageKind::Close,
            events: &["close"],
            structural: false,
            decode: |data| {
                if data.is_null() || data.is_object() {
                    Ok(RelayMessage::Close)
                } else {
                    Err(serde_json::Error::custom("close data must be an object"))
                }
            },
        },
    ]
}

/// Decode one inbound text frame
pub fn decode_frame(text: &str) -> Result<RelayFrame> {
    let frame: RawFrame = serde_json::from_str(text)
        .map_err(|e| ConnectError::ProtocolDecode(format!("malformed frame: {}", e)))?;

    let table = candidates();
    let named: Vec<&Candidate> = match frame.event.as_deref() {
        Some(event) => table.iter().filter(|c| c.events.contains(&event)).collect(),
        None => Vec::new(),
    };
    let tried = if named.is_empty() {
        table.iter().filter(|c| c.structural).collect()
    } else {
        named
    };

    for candidate in tried {
        match (candidate.decode)(&frame.data) {
            Ok(message) => return Ok(RelayFrame::new(frame.event.as_deref(), message)),
            Err(e) => trace!(kind = candidate.kind.as_str(), error = %e, "Candidate rejected"),
        }
    }

    Err(ConnectError::ProtocolDecode(format!(
        "no message schema matched event {:?}",
        frame.event
    )))
}

// ============================================================================
// Outbound messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectData {
    pub topic: Option<String>,
    pub user_initiated: bool,
}

/// Correlation of a routed session request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureData {
    pub topic: String,
    pub transaction_hash: String,
    pub transaction_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainChangedData {
    pub topic: String,
    pub uri: String,
    pub chain_id: String,
}

/// Answer to a dapp session proposal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DappSessionResponseData {
    pub id: RequestId,
    pub topic: String,
    pub address: String,
    pub chain_id: ChainId,
    pub params: SessionProposal,
}

/// Frame written to the relay
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "connect")]
    Connect(ConnectData),
    #[serde(rename = "disconnect")]
    Disconnect(DisconnectData),
    #[serde(rename = "signatureReceived")]
    SignatureReceived(SignatureData),
    #[serde(rename = "portal_signatureRejected")]
    SignatureRejected(SignatureData),
    #[serde(rename = "portal_chainChanged")]
    ChainChanged(ChainChangedData),
    #[serde(rename = "portal_dappSessionApproved")]
    DappSessionApproved(DappSessionResponseData),
    #[serde(rename = "portal_dappSessionRejected")]
    DappSessionRejected(DappSessionResponseData),
}

impl OutboundMessage {
    /// Event name written on the wire
    pub fn event(&self) -> &'static str {
        match self {
            OutboundMessage::Connect(_) => "connect",
            OutboundMessage::Disconnect(_) => "disconnect",
            OutboundMessage::SignatureReceived(_) => "signatureReceived",
            OutboundMessage::SignatureRejected(_) => "portal_signatureRejected",
            OutboundMessage::ChainChanged(_) => "portal_chainChanged",
            OutboundMessage::DappSessionApproved(_) => "portal_dappSessionApproved",
            OutboundMessage::DappSessionRejected(_) => "portal_dappSessionRejected",
        }
    }

    /// Successful signature for a session request
    pub fn signature_received(
        topic: impl Into<String>,
        transaction_id: impl Into<RequestId>,
        signature: impl Into<String>,
    ) -> Self {
        OutboundMessage::SignatureReceived(SignatureData {
            topic: topic.into(),
            transaction_hash: signature.into(),
            transaction_id: transaction_id.into(),
        })
    }

    /// Rejection for a session request
    pub fn signature_rejected(
        topic: impl Into<String>,
        transaction_id: impl Into<RequestId>,
    ) -> Self {
        OutboundMessage::SignatureRejected(SignatureData {
            topic: topic.into(),
            transaction_hash: String::new(),
            transaction_id: transaction_id.into(),
        })
    }
}
