//! # Portal Connect
//!
//! Relay session client connecting dapps to the Portal wallet.
//!
//! A dapp pairs with the wallet through a relay server. This crate keeps the
//! relay connection alive, decodes the relay's frames, routes every dapp
//! request through a [`portal_core::Provider`] and answers it on the relay.
//!
//! ## Architecture
//!
//! - **Transport**: opens connections; WebSocket for production, in-memory for tests
//! - **RelayClient**: connection state machine, frame decoding, serialized writes
//! - **PortalConnect**: session lifecycle, request routing and result correlation
//!
//! ## Example
//!
//! ```rust,ignore
//! use portal_connect::{ConnectConfig, ConnectEvent, ConnectEventKind, PortalConnect};
//!
//! let connect = PortalConnect::websocket(provider, ConnectConfig::default().with_chains([1, 137]));
//!
//! connect.events().on(ConnectEventKind::Connected, |event| {
//!     if let ConnectEvent::Connected(session) = event {
//!         println!("paired with {}", session.topic);
//!     }
//!     Ok(())
//! });
//!
//! connect.connect("wc:8a5e...@2?relay-protocol=irn&symKey=...").await?;
//! ```

pub mod client;
pub mod connect;
pub mod error;
pub mod message;
pub mod session;
pub mod transport;

pub use client::{
    ConnectionState, DEFAULT_RELAY_URL, RelayClient, RelayClientConfig, RelayEvent,
    RelayEventKind,
};
pub use connect::{ConnectConfig, ConnectErrorInfo, ConnectEvent, ConnectEventKind, PortalConnect};
pub use error::{ConnectError, Result, TransportError, TransportErrorKind};
pub use message::{
    DappSessionRequestData, InboundRequest, OutboundMessage, RelayFrame, RelayMessage,
    RelayMessageKind, decode_frame,
};
pub use session::{EIP155_NAMESPACE, Namespace, PeerMetadata, Session, SessionProposal};
pub use transport::{Connection, MemoryTransport, Transport, TransportEvent, WriteCommand};

#[cfg(feature = "websocket")]
pub use transport::WebSocketTransport;
