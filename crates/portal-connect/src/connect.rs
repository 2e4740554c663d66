//! Dapp connection orchestrator
//!
//! [`PortalConnect`] binds a [`RelayClient`] to a [`Provider`]: session
//! requests from the dapp are routed through the provider and answered with
//! exactly one `signatureReceived` or `portal_signatureRejected` frame, chain
//! switches are relayed to the dapp, and dapp session proposals are surfaced
//! to the host app for approval.

use crate::client::{ConnectionState, RelayClient, RelayClientConfig, RelayEvent, RelayEventKind};
use crate::error::{ConnectError, Result};
use crate::message::{
    ChainChangedData, DappSessionRequestData, DappSessionResponseData, InboundRequest,
    OutboundMessage, RelayMessage, RelayMessageKind,
};
use crate::session::Session;
use crate::transport::Transport;
use dashmap::DashMap;
use parking_lot::Mutex;
use portal_core::{
    BusEvent, ChainId, EventBus, Provider, ProviderEvent, ProviderEventKind, RequestId,
    SubscriptionId, chain_id_hex, parse_chain_id,
};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument, warn};

/// Orchestrator configuration
#[derive(Debug, Clone, Default)]
pub struct ConnectConfig {
    /// Relay client settings
    pub relay: RelayClientConfig,
    /// Chains offered to dapps in addition to the ones they request
    pub chains: Vec<ChainId>,
    /// Runtime that relay work is spawned on; defaults to the one current at construction
    pub runtime: Option<Handle>,
}

impl ConnectConfig {
    pub fn new(relay: RelayClientConfig) -> Self {
        Self {
            relay,
            chains: Vec::new(),
            runtime: None,
        }
    }

    /// Set the locally supported chains
    pub fn with_chains(mut self, chains: impl IntoIterator<Item = ChainId>) -> Self {
        self.chains = chains.into_iter().collect();
        self
    }

    /// Spawn relay work on `runtime`
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

/// Error surfaced to the host app
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectErrorInfo {
    pub message: String,
    pub code: Option<i64>,
}

/// Event published for the host app
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectEvent {
    /// A dapp session was established
    Connected(Session),
    /// The dapp session ended
    Disconnected { user_initiated: bool },
    /// Relay or transport error
    Error(ConnectErrorInfo),
    /// A dapp proposes a session; answer with `approve_session` or `reject_session`
    DappSessionRequested(DappSessionRequestData),
}

/// Kind tag of a [`ConnectEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectEventKind {
    Connected,
    Disconnected,
    Error,
    DappSessionRequested,
}

impl BusEvent for ConnectEvent {
    type Kind = ConnectEventKind;

    fn kind(&self) -> ConnectEventKind {
        match self {
            ConnectEvent::Connected(_) => ConnectEventKind::Connected,
            ConnectEvent::Disconnected { .. } => ConnectEventKind::Disconnected,
            ConnectEvent::Error(_) => ConnectEventKind::Error,
            ConnectEvent::DappSessionRequested(_) => ConnectEventKind::DappSessionRequested,
        }
    }
}

/// Where the answer to a session request goes
#[derive(Debug, Clone)]
struct Correlation {
    topic: String,
    /// Client the request arrived on; answers are dropped once it is replaced
    client: RelayClient,
}

/// A relay client with the subscriptions bound on it
struct BoundClient {
    client: RelayClient,
    subscriptions: Vec<(RelayEventKind, SubscriptionId)>,
}

impl BoundClient {
    fn unbind(&self) {
        let events = self.client.events();
        for (kind, id) in &self.subscriptions {
            events.unsubscribe(*kind, *id);
        }
    }
}

struct ConnectInner {
    config: ConnectConfig,
    runtime: Option<Handle>,
    provider: Arc<Provider>,
    transport: Arc<dyn Transport>,
    client: Mutex<Option<BoundClient>>,
    session: Mutex<Option<Session>>,
    events: Arc<EventBus<ConnectEvent>>,
    correlations: DashMap<RequestId, Correlation>,
    chain_subscription: Mutex<Option<SubscriptionId>>,
}

/// Connects a dapp to the wallet through the relay
#[derive(Clone)]
pub struct PortalConnect {
    inner: Arc<ConnectInner>,
}

impl PortalConnect {
    /// Create an orchestrator routing through `provider`
    ///
    /// Call from within a Tokio runtime, or supply one with
    /// [`ConnectConfig::with_runtime`]. Provider events may then be emitted
    /// from any thread.
    pub fn new(provider: Arc<Provider>, transport: Arc<dyn Transport>, config: ConnectConfig) -> Self {
        let runtime = config.runtime.clone().or_else(|| Handle::try_current().ok());
        if runtime.is_none() {
            warn!("PortalConnect created outside a Tokio runtime");
        }

        let inner = Arc::new(ConnectInner {
            config,
            runtime,
            provider,
            transport,
            client: Mutex::new(None),
            session: Mutex::new(None),
            events: Arc::new(EventBus::new()),
            correlations: DashMap::new(),
            chain_subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let id = inner
            .provider
            .events()
            .on(ProviderEventKind::ChainChanged, move |event| {
                if let (Some(inner), ProviderEvent::ChainChanged { chain_id }) =
                    (weak.upgrade(), event)
                {
                    inner.on_chain_changed(chain_id);
                }
                Ok(())
            });
        *inner.chain_subscription.lock() = Some(id);

        Self { inner }
    }

    /// Create an orchestrator over a WebSocket transport
    #[cfg(feature = "websocket")]
    pub fn websocket(provider: Arc<Provider>, config: ConnectConfig) -> Self {
        let transport = crate::transport::WebSocketTransport::new()
            .with_channel_capacity(config.relay.channel_capacity);
        Self::new(provider, Arc::new(transport), config)
    }

    /// Bus carrying session lifecycle events for the host app
    pub fn events(&self) -> &Arc<EventBus<ConnectEvent>> {
        &self.inner.events
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.inner.provider
    }

    /// The established dapp session
    pub fn session(&self) -> Option<Session> {
        self.inner.session.lock().clone()
    }

    /// The current relay client
    pub fn client(&self) -> Option<RelayClient> {
        self.inner.current_client()
    }

    /// Session requests routed but not answered yet
    pub fn pending_requests(&self) -> usize {
        self.inner.correlations.len()
    }

    /// Connect to the relay for pairing `uri`
    ///
    /// A no-op when already connected for the same uri. For a different uri
    /// the old client is unbound and disconnected first.
    #[instrument(skip(self))]
    pub async fn connect(&self, uri: &str) -> Result<()> {
        let (client, previous) = {
            let mut slot = self.inner.client.lock();
            if let Some(bound) = slot.as_ref() {
                if bound.client.uri().as_deref() == Some(uri)
                    && (bound.client.is_connected()
                        || bound.client.state() == ConnectionState::Connecting)
                {
                    debug!("Already connected for this uri");
                    return Ok(());
                }
            }

            let client = RelayClient::new(self.inner.config.relay.clone(), self.inner.transport.clone());
            let subscriptions = self.inner.bind(&client);
            let previous = slot.replace(BoundClient {
                client: client.clone(),
                subscriptions,
            });
            (client, previous)
        };

        if let Some(previous) = previous {
            info!("Replacing relay client");
            previous.unbind();
            previous.client.disconnect(true).await?;
            self.inner.end_session();
        }

        match self.inner.provider.address().await {
            Ok(address) => client.set_session_address(address, self.inner.provider.chain_id()),
            Err(e) => debug!(error = %e, "No wallet address for the handshake"),
        }

        client.connect(uri).await
    }

    /// End the dapp session and close the relay connection
    #[instrument(skip(self))]
    pub async fn disconnect(&self, user_initiated: bool) -> Result<()> {
        let client = self.inner.current_client().ok_or(ConnectError::NotConnected)?;
        client.disconnect(user_initiated).await?;

        if self.inner.end_session() {
            self.inner
                .events
                .emit(&ConnectEvent::Disconnected { user_initiated });
        }
        Ok(())
    }

    /// Approve a dapp session proposal
    pub async fn approve_session(&self, request: &DappSessionRequestData) -> Result<()> {
        self.inner.approve_session(request).await
    }

    /// Reject a dapp session proposal
    pub async fn reject_session(&self, request: &DappSessionRequestData) -> Result<()> {
        self.inner.reject_session(request).await
    }

    /// Switch the wallet's chain; the dapp is notified when a session exists
    pub fn set_chain_id(&self, chain_id: ChainId) {
        self.inner.provider.set_chain_id(chain_id);
    }

    /// Tell the dapp which chain is active
    pub async fn notify_chain_changed(&self) -> Result<()> {
        let chain_id = chain_id_hex(self.inner.provider.chain_id());
        self.inner.send_chain_changed(chain_id).await
    }
}

impl std::fmt::Debug for PortalConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalConnect")
            .field("client", &self.inner.current_client())
            .field("session", &self.inner.session.lock())
            .finish()
    }
}

type RelayHandler = fn(&Arc<ConnectInner>, &RelayEvent);

impl ConnectInner {
    fn current_client(&self) -> Option<RelayClient> {
        self.client.lock().as_ref().map(|bound| bound.client.clone())
    }

    fn is_current(&self, client: &RelayClient) -> bool {
        self.client
            .lock()
            .as_ref()
            .is_some_and(|bound| bound.client.same_client(client))
    }

    /// Run relay work from a synchronous bus handler
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Handlers may run on host threads outside Tokio
        match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => {
                runtime.spawn(future);
            }
            None => error!("No Tokio runtime for relay work, dropping it"),
        }
    }

    fn bind(self: &Arc<Self>, client: &RelayClient) -> Vec<(RelayEventKind, SubscriptionId)> {
        let events = client.events();
        let mut subscriptions = Vec::new();
        let mut bind = |kind: RelayEventKind, handler: RelayHandler| {
            let weak: Weak<ConnectInner> = Arc::downgrade(self);
            let id = events.on(kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    handler(&inner, event);
                }
                Ok(())
            });
            subscriptions.push((kind, id));
        };

        bind(
            RelayEventKind::Message(RelayMessageKind::ConnectedV1),
            ConnectInner::on_established,
        );
        bind(
            RelayEventKind::Message(RelayMessageKind::Connected),
            ConnectInner::on_established,
        );
        bind(
            RelayEventKind::Message(RelayMessageKind::Disconnected),
            ConnectInner::on_disconnected,
        );
        bind(
            RelayEventKind::Message(RelayMessageKind::Close),
            ConnectInner::on_disconnected,
        );
        bind(RelayEventKind::Closed, ConnectInner::on_closed);
        bind(
            RelayEventKind::Message(RelayMessageKind::Error),
            ConnectInner::on_error,
        );
        bind(RelayEventKind::ConnectError, ConnectInner::on_error);
        bind(
            RelayEventKind::Message(RelayMessageKind::DappSessionRequested),
            ConnectInner::on_dapp_session_requested,
        );
        for kind in RelayMessageKind::SESSION_REQUESTS {
            bind(RelayEventKind::Message(kind), ConnectInner::on_session_request);
        }

        subscriptions
    }

    /// Clear the session and cancel approvals that can no longer be answered
    ///
    /// Returns true if a session was active.
    fn end_session(&self) -> bool {
        let had_session = self.session.lock().take().is_some();
        let cancelled = self.provider.reject_pending();
        if had_session || cancelled > 0 {
            info!(cancelled, "Dapp session ended");
        }
        had_session
    }

    fn on_established(self: &Arc<Self>, event: &RelayEvent) {
        let RelayEvent::Message(frame) = event else {
            return;
        };
        let Some((topic, peer_metadata)) = frame.message().established() else {
            return;
        };

        let session = Session::new(topic, self.provider.chain_id(), peer_metadata);
        info!(topic = %session.topic, "Dapp session established");
        *self.session.lock() = Some(session.clone());

        self.provider.announce();
        self.events.emit(&ConnectEvent::Connected(session));
    }

    fn on_disconnected(self: &Arc<Self>, _event: &RelayEvent) {
        info!("Dapp disconnected");
        self.end_session();
        self.events.emit(&ConnectEvent::Disconnected {
            user_initiated: false,
        });

        if let Some(client) = self.current_client() {
            self.spawn(async move {
                if let Err(e) = client.disconnect(false).await {
                    warn!(error = %e, "Failed to close relay connection");
                }
            });
        }
    }

    fn on_closed(self: &Arc<Self>, _event: &RelayEvent) {
        if self.end_session() {
            self.events.emit(&ConnectEvent::Disconnected {
                user_initiated: false,
            });
        }
    }

    fn on_error(self: &Arc<Self>, event: &RelayEvent) {
        let info = match event {
            RelayEvent::Message(frame) => match frame.message() {
                RelayMessage::Error(data) => ConnectErrorInfo {
                    message: data.message.clone(),
                    code: data.code,
                },
                _ => return,
            },
            RelayEvent::ConnectError(e) => ConnectErrorInfo {
                message: e.to_string(),
                code: None,
            },
            _ => return,
        };
        warn!(message = %info.message, "Relay error");
        self.events.emit(&ConnectEvent::Error(info));
    }

    fn on_session_request(self: &Arc<Self>, event: &RelayEvent) {
        let RelayEvent::Message(frame) = event else {
            return;
        };
        let Some(request) = frame.message().session_request() else {
            return;
        };
        let Some(client) = self.current_client() else {
            warn!(id = %request.id, "Session request without a relay client");
            return;
        };

        let inner = Arc::clone(self);
        self.spawn(async move {
            inner.handle_request(request, client).await;
        });
    }

    fn on_dapp_session_requested(self: &Arc<Self>, event: &RelayEvent) {
        let RelayEvent::Message(frame) = event else {
            return;
        };
        let RelayMessage::DappSessionRequested(data) = frame.message() else {
            return;
        };

        let mut request = data.clone();
        request.params = request.params.with_local_chains(&self.config.chains);
        info!(id = %request.id, "Dapp session proposed");

        if self.provider.auto_approve() {
            let inner = Arc::clone(self);
            self.spawn(async move {
                if let Err(e) = inner.approve_session(&request).await {
                    warn!(error = %e, "Failed to approve dapp session");
                }
            });
        } else if self
            .events
            .has_listeners(ConnectEventKind::DappSessionRequested)
        {
            self.events.emit(&ConnectEvent::DappSessionRequested(request));
        } else {
            warn!("No listener for dapp session proposals, rejecting");
            let inner = Arc::clone(self);
            self.spawn(async move {
                if let Err(e) = inner.reject_session(&request).await {
                    warn!(error = %e, "Failed to reject dapp session");
                }
            });
        }
    }

    /// Route one session request and answer it on the relay
    #[instrument(skip(self, request), fields(id = %request.id, method = %request.method))]
    async fn handle_request(self: Arc<Self>, request: InboundRequest, client: RelayClient) {
        let payload = request.to_payload(self.provider.chain_id());
        self.correlations.insert(
            request.id.clone(),
            Correlation {
                topic: request.topic.clone(),
                client,
            },
        );

        // A rejection may arrive while the route is still pending
        let weak = Arc::downgrade(&self);
        let id = request.id.clone();
        let rejection = self
            .provider
            .events()
            .on(ProviderEventKind::SigningRejected, move |event| {
                let matches = event.payload().is_some_and(|p| p.id == id);
                if let (true, Some(inner)) = (matches, weak.upgrade()) {
                    let id = id.clone();
                    let task = Arc::clone(&inner);
                    inner.spawn(async move {
                        task.send_result(&id, Err(portal_core::Error::UserRejectedRequest(id.clone())))
                            .await;
                    });
                }
                Ok(())
            });

        let result = self.provider.route(payload).await;
        self.provider
            .events()
            .unsubscribe(ProviderEventKind::SigningRejected, rejection);

        self.send_result(&request.id, result).await;
    }

    /// Answer a session request, at most once per request id
    async fn send_result(&self, id: &RequestId, result: portal_core::Result<Value>) {
        let Some((_, correlation)) = self.correlations.remove(id) else {
            debug!(id = %id, "Request already answered");
            return;
        };

        let topic = correlation.topic.clone();
        let message = match result {
            Ok(Value::String(signature)) => {
                OutboundMessage::signature_received(topic, id.clone(), signature)
            }
            Ok(value) => OutboundMessage::signature_received(topic, id.clone(), value.to_string()),
            Err(e) => {
                info!(id = %id, error = %e, "Request failed, rejecting");
                OutboundMessage::signature_rejected(topic, id.clone())
            }
        };

        if !self.is_current(&correlation.client) {
            debug!(id = %id, topic = %correlation.topic, "Relay client replaced, dropping answer");
            return;
        }
        if let Err(e) = correlation.client.send(&message).await {
            warn!(id = %id, error = %e, "Failed to answer request");
        }
    }

    fn on_chain_changed(self: &Arc<Self>, chain_id: &str) {
        if self.session.lock().is_none() {
            debug!(chain_id, "No dapp session to notify of chain change");
            return;
        }

        let inner = Arc::clone(self);
        let chain_id = chain_id.to_string();
        self.spawn(async move {
            if let Err(e) = inner.send_chain_changed(chain_id).await {
                warn!(error = %e, "Failed to relay chain change");
            }
        });
    }

    async fn send_chain_changed(&self, chain_id: String) -> Result<()> {
        let topic = {
            let mut session = self.session.lock();
            let session = session.as_mut().ok_or(ConnectError::SessionNotEstablished)?;
            if let Some(id) = parse_chain_id(&Value::String(chain_id.clone())) {
                session.chain_id = id;
            }
            session.topic.clone()
        };

        let client = self.current_client().ok_or(ConnectError::NotConnected)?;
        let uri = client.uri().ok_or(ConnectError::SessionNotEstablished)?;
        if let Ok(address) = self.provider.address().await {
            client.set_session_address(address, self.provider.chain_id());
        }

        client
            .send(&OutboundMessage::ChainChanged(ChainChangedData {
                topic,
                uri,
                chain_id,
            }))
            .await
    }

    async fn session_response(
        &self,
        request: &DappSessionRequestData,
    ) -> Result<(RelayClient, DappSessionResponseData)> {
        let client = self.current_client().ok_or(ConnectError::NotConnected)?;
        let address = self.provider.address().await?;
        Ok((
            client,
            DappSessionResponseData {
                id: request.id.clone(),
                topic: request.topic.clone(),
                address,
                chain_id: self.provider.chain_id(),
                params: request.params.clone(),
            },
        ))
    }

    async fn approve_session(&self, request: &DappSessionRequestData) -> Result<()> {
        let (client, data) = self.session_response(request).await?;
        info!(id = %data.id, "Approving dapp session");
        client
            .send(&OutboundMessage::DappSessionApproved(data))
            .await
    }

    async fn reject_session(&self, request: &DappSessionRequestData) -> Result<()> {
        let (client, data) = self.session_response(request).await?;
        info!(id = %data.id, "Rejecting dapp session");
        client
            .send(&OutboundMessage::DappSessionRejected(data))
            .await
    }
}

impl Drop for ConnectInner {
    fn drop(&mut self) {
        if let Some(id) = self.chain_subscription.lock().take() {
            self.provider
                .events()
                .unsubscribe(ProviderEventKind::ChainChanged, id);
        }
        if let Some(bound) = self.client.lock().take() {
            bound.unbind();
        }
    }
}
