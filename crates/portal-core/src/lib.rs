//! # Portal Core
//!
//! Request routing for the Portal wallet client. Every wallet-facing
//! JSON-RPC call goes through the [`Provider`], which decides whether it is
//! forwarded to the chain gateway, passed to the wallet-config endpoint, or
//! signed by the device after the user approves it.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **EventBus**: typed publish/subscribe registry with one-shot handlers
//! - **Provider**: method classification and the asynchronous approval gate
//! - **Collaborator traits**: `Signer`, `ShareStore`, `Gateway`, `WalletEndpoint`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portal_core::{Provider, ProviderConfig, ProviderEvent, ProviderEventKind, RequestPayload};
//!
//! let provider = Provider::builder()
//!     .config(ProviderConfig::default().with_chain_id(11155111))
//!     .signer(signer)
//!     .share_store(shares)
//!     .gateway(gateway)
//!     .build()?;
//!
//! // Show approvals to the user
//! let events = provider.events().clone();
//! provider.events().on(ProviderEventKind::SigningRequested, move |event| {
//!     if let Some(payload) = event.payload() {
//!         events.emit(&ProviderEvent::SigningApproved(payload.clone()));
//!     }
//!     Ok(())
//! });
//!
//! let signature = provider
//!     .route(RequestPayload::new("personal_sign", vec!["0xdead".into()]))
//!     .await?;
//! ```

pub mod bus;
pub mod error;
pub mod events;
pub mod gateway;
pub mod methods;
pub mod provider;
pub mod signer;
pub mod types;

pub use bus::{BusEvent, EventBus, SubscriptionId};
pub use error::{Error, Result, SigningError};
pub use events::{ProviderEvent, ProviderEventKind};
pub use gateway::{Gateway, WalletEndpoint};
pub use methods::{MethodClass, SIGNER_METHODS, WALLET_METHODS, classify};
pub use provider::{Provider, ProviderBuilder, ProviderConfig};
pub use signer::{KeyShareRef, MemoryShareStore, ShareStore, Signer, SignerResponse, SigningRequest};
pub use types::{
    ChainId, DEFAULT_CHAIN_ID, RequestId, RequestPayload, RpcEnvelope, chain_id_hex,
    parse_chain_id,
};

#[cfg(feature = "http")]
pub use gateway::{HttpGateway, HttpWalletEndpoint, RpcErrorObject, RpcResponse};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
