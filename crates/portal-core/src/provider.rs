//! Request router
//!
//! The [`Provider`] classifies every wallet call and sends it to the right
//! backend:
//!
//! ```text
//! route(payload)
//!    │
//!    ├── signer method ──► approval gate ──► ShareStore + Signer
//!    ├── wallet method ──► approval gate ──► WalletEndpoint
//!    ├── eth_* ─────────────────────────────► Gateway
//!    └── anything else ──► UnsupportedMethod
//! ```
//!
//! ## Approval gate
//!
//! Unless `auto_approve` is set, a gated request emits
//! [`ProviderEvent::SigningRequested`] and waits until the host app emits
//! [`ProviderEvent::SigningApproved`] or [`ProviderEvent::SigningRejected`]
//! carrying the same request id. The wait has no timeout. It also ends when
//! the bus is reset or [`Provider::reject_pending`] is called.

use crate::bus::{EventBus, SubscriptionId};
use crate::events::{ProviderEvent, ProviderEventKind};
use crate::gateway::{Gateway, WalletEndpoint};
use crate::methods::{DEFAULT_GATEWAY_NAMESPACE, MethodClass, classify};
use crate::signer::{ShareStore, Signer, SigningRequest};
use crate::types::{ChainId, DEFAULT_CHAIN_ID, RequestId, RequestPayload, RpcEnvelope, chain_id_hex};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Chain used when a request names none
    pub chain_id: ChainId,
    /// Skip the approval gate entirely
    pub auto_approve: bool,
    /// Method prefix forwarded to the chain gateway
    pub gateway_namespace: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            auto_approve: false,
            gateway_namespace: DEFAULT_GATEWAY_NAMESPACE.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Set the initial chain
    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Approve every gated request without asking
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    /// Change the gateway namespace prefix
    pub fn with_gateway_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.gateway_namespace = namespace.into();
        self
    }
}

/// Outcome of an approval wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApprovalDecision {
    Approved,
    Rejected,
    Cancelled,
}

type PendingSlot = Arc<Mutex<Option<oneshot::Sender<ApprovalDecision>>>>;

/// Builder for [`Provider`]
#[derive(Default)]
pub struct ProviderBuilder {
    config: ProviderConfig,
    signer: Option<Arc<dyn Signer>>,
    shares: Option<Arc<dyn ShareStore>>,
    gateway: Option<Arc<dyn Gateway>>,
    wallet: Option<Arc<dyn WalletEndpoint>>,
    events: Option<Arc<EventBus<ProviderEvent>>>,
}

impl ProviderBuilder {
    /// Set the configuration
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the signing capability
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Set the share store
    pub fn share_store(mut self, shares: Arc<dyn ShareStore>) -> Self {
        self.shares = Some(shares);
        self
    }

    /// Set the chain gateway
    pub fn gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the wallet-config endpoint
    pub fn wallet_endpoint(mut self, wallet: Arc<dyn WalletEndpoint>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Share an existing event bus instead of creating one
    pub fn events(mut self, events: Arc<EventBus<ProviderEvent>>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the provider
    pub fn build(self) -> Result<Provider> {
        let signer = self
            .signer
            .ok_or_else(|| Error::InvalidConfig("signer is required".into()))?;
        let shares = self
            .shares
            .ok_or_else(|| Error::InvalidConfig("share store is required".into()))?;

        Ok(Provider {
            chain_id: AtomicU64::new(self.config.chain_id),
            config: self.config,
            events: self.events.unwrap_or_default(),
            signer,
            shares,
            gateway: self.gateway,
            wallet: self.wallet,
            pending: DashMap::new(),
        })
    }
}

/// Routes wallet calls to the gateway, the wallet endpoint or the signer
pub struct Provider {
    config: ProviderConfig,
    chain_id: AtomicU64,
    events: Arc<EventBus<ProviderEvent>>,
    signer: Arc<dyn Signer>,
    shares: Arc<dyn ShareStore>,
    gateway: Option<Arc<dyn Gateway>>,
    wallet: Option<Arc<dyn WalletEndpoint>>,
    /// Approval waits in flight, weakly held so a bus reset cancels them
    pending: DashMap<RequestId, Weak<Mutex<Option<oneshot::Sender<ApprovalDecision>>>>>,
}

impl Provider {
    /// Start building a provider
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    /// The provider's event bus
    pub fn events(&self) -> &Arc<EventBus<ProviderEvent>> {
        &self.events
    }

    /// Current default chain
    pub fn chain_id(&self) -> ChainId {
        self.chain_id.load(Ordering::Acquire)
    }

    /// Whether gated requests skip approval
    pub fn auto_approve(&self) -> bool {
        self.config.auto_approve
    }

    /// Wallet address from the share store
    pub async fn address(&self) -> Result<String> {
        self.shares.address().await
    }

    /// Announce readiness with the current chain
    pub fn announce(&self) {
        self.events.emit(&ProviderEvent::Connect {
            chain_id: chain_id_hex(self.chain_id()),
        });
    }

    /// Switch the default chain and emit `chainChanged`
    pub fn set_chain_id(&self, chain_id: ChainId) {
        self.chain_id.store(chain_id, Ordering::Release);
        info!(chain_id, "Chain changed");

        self.events.emit(&ProviderEvent::ChainChanged {
            chain_id: chain_id_hex(chain_id),
        });
    }

    /// Number of requests waiting for approval
    pub fn pending_approvals(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Cancel every approval wait in flight
    ///
    /// Returns the number of requests that were cancelled.
    pub fn reject_pending(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.pending.iter() {
            if let Some(slot) = entry.value().upgrade() {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(ApprovalDecision::Cancelled);
                    cancelled += 1;
                }
            }
        }

        if cancelled > 0 {
            info!(cancelled, "Cancelled pending approvals");
        }
        cancelled
    }

    /// Route a wallet call to its backend
    #[instrument(skip(self, payload), fields(id = %payload.id, method = %payload.method))]
    pub async fn route(&self, mut payload: RequestPayload) -> Result<Value> {
        let class = classify(&payload.method, &self.config.gateway_namespace)?;
        let chain_id = payload.chain_id.unwrap_or_else(|| self.chain_id());
        payload.chain_id = Some(chain_id);

        match class {
            MethodClass::Gateway => {
                debug!(chain_id, "Forwarding to gateway");
                let gateway = self
                    .gateway
                    .as_ref()
                    .ok_or_else(|| Error::Gateway("No gateway configured".into()))?;
                gateway
                    .request(chain_id, RpcEnvelope::from_payload(&payload))
                    .await
            }
            MethodClass::Wallet => {
                self.await_approval(&payload).await?;

                let wallet = self
                    .wallet
                    .as_ref()
                    .ok_or_else(|| Error::WalletEndpoint("No wallet endpoint configured".into()))?;
                wallet
                    .request(chain_id, RpcEnvelope::from_payload(&payload))
                    .await
            }
            MethodClass::Signer => {
                self.await_approval(&payload).await?;

                let share = self.shares.signing_share().await?;
                let response = self
                    .signer
                    .sign(SigningRequest {
                        method: payload.method,
                        params: payload.params,
                        chain_id,
                        share,
                    })
                    .await?;

                Ok(response.into_value())
            }
        }
    }

    async fn await_approval(&self, payload: &RequestPayload) -> Result<()> {
        if self.config.auto_approve {
            debug!("Auto-approved");
            return Ok(());
        }

        if !self.events.has_listeners(ProviderEventKind::SigningRequested) {
            warn!("No listener bound for signing requests");
            return Err(Error::NoBindingForApproval(payload.method.clone()));
        }

        let (tx, rx) = oneshot::channel();
        let slot: PendingSlot = Arc::new(Mutex::new(Some(tx)));

        let _guard = ApprovalGuard {
            approved: self.events.on(
                ProviderEventKind::SigningApproved,
                decision_handler(&payload.id, &slot, ApprovalDecision::Approved),
            ),
            rejected: self.events.on(
                ProviderEventKind::SigningRejected,
                decision_handler(&payload.id, &slot, ApprovalDecision::Rejected),
            ),
            provider: self,
            id: payload.id.clone(),
        };
        self.pending
            .insert(payload.id.clone(), Arc::downgrade(&slot));
        // Only the subscriptions keep the sender alive from here on
        drop(slot);

        self.events
            .emit(&ProviderEvent::SigningRequested(payload.clone()));

        match rx.await {
            Ok(ApprovalDecision::Approved) => {
                debug!("Approved");
                Ok(())
            }
            Ok(ApprovalDecision::Rejected) => {
                info!("Rejected by user");
                Err(Error::UserRejectedRequest(payload.id.clone()))
            }
            Ok(ApprovalDecision::Cancelled) | Err(_) => {
                info!("Approval cancelled");
                Err(Error::ApprovalCancelled(payload.id.clone()))
            }
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("chain_id", &self.chain_id())
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Resolves the wait for one request id
fn decision_handler(
    id: &str,
    slot: &PendingSlot,
    decision: ApprovalDecision,
) -> impl Fn(&ProviderEvent) -> Result<()> + Send + Sync + 'static {
    let id = id.to_string();
    let slot = Arc::clone(slot);

    move |event| {
        if event.payload().is_some_and(|p| p.id == id) {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(decision);
            }
        }
        Ok(())
    }
}

/// Removes a request's approval subscriptions when its wait ends
struct ApprovalGuard<'a> {
    provider: &'a Provider,
    id: RequestId,
    approved: SubscriptionId,
    rejected: SubscriptionId,
}

impl Drop for ApprovalGuard<'_> {
    fn drop(&mut self) {
        let events = &self.provider.events;
        events.unsubscribe(ProviderEventKind::SigningApproved, self.approved);
        events.unsubscribe(ProviderEventKind::SigningRejected, self.rejected);
        self.provider.pending.remove(&self.id);
    }
}
