//! Relay session client
//!
//! Owns one relay connection at a time and re-emits every decoded inbound
//! frame on its own [`EventBus`].

use crate::error::{ConnectError, Result, TransportError};
use crate::message::{
    ConnectData, DisconnectData, OutboundMessage, RelayFrame, RelayMessageKind, decode_frame,
};
use crate::transport::{Connection, Transport, TransportEvent, WriteCommand};
use parking_lot::Mutex;
use portal_core::{BusEvent, ChainId, EventBus};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

/// Default relay endpoint
pub const DEFAULT_RELAY_URL: &str = "wss://connect.portalhq.io/";

/// Relay client configuration
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Relay WebSocket endpoint
    pub relay_url: String,
    /// Upper bound on waiting for the final `disconnect` frame to be written
    pub final_message_timeout: Duration,
    /// Capacity of the per-connection channels
    pub channel_capacity: usize,
}

impl RelayClientConfig {
    /// Create a new config
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            final_message_timeout: Duration::from_secs(5),
            channel_capacity: 64,
        }
    }

    /// Set the final message timeout
    pub fn with_final_message_timeout(mut self, timeout: Duration) -> Self {
        self.final_message_timeout = timeout;
        self
    }

    /// Set the channel capacity
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_URL)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Event emitted by the relay client
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A decoded inbound frame, keyed by its wire event
    Message(RelayFrame),
    /// Transport failure that is not retried
    ConnectError(TransportError),
    /// The connection completed
    Closed,
}

/// Kind tag of a [`RelayEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayEventKind {
    Message(RelayMessageKind),
    ConnectError,
    Closed,
}

impl BusEvent for RelayEvent {
    type Kind = RelayEventKind;

    fn kind(&self) -> RelayEventKind {
        match self {
            RelayEvent::Message(frame) => RelayEventKind::Message(frame.kind()),
            RelayEvent::ConnectError(_) => RelayEventKind::ConnectError,
            RelayEvent::Closed => RelayEventKind::Closed,
        }
    }
}

#[derive(Debug)]
struct ClientState {
    connection: ConnectionState,
    uri: Option<String>,
    topic: Option<String>,
    /// Address and chain announced in the handshake
    session_address: Option<(String, ChainId)>,
    writer: Option<mpsc::Sender<WriteCommand>>,
}

struct ClientInner {
    config: RelayClientConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<ClientState>,
    events: Arc<EventBus<RelayEvent>>,
    /// Bumped whenever a connection is opened or abandoned
    generation: AtomicU64,
}

/// Relay session client
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

/// How a reader loop ended
enum ReadExit {
    Completed,
    Reset,
    Superseded,
}

impl RelayClient {
    /// Create a client over `transport`
    pub fn new(config: RelayClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                state: Mutex::new(ClientState {
                    connection: ConnectionState::Disconnected,
                    uri: None,
                    topic: None,
                    session_address: None,
                    writer: None,
                }),
                events: Arc::new(EventBus::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Create a client over a WebSocket transport
    #[cfg(feature = "websocket")]
    pub fn websocket(config: RelayClientConfig) -> Self {
        let transport = crate::transport::WebSocketTransport::new()
            .with_channel_capacity(config.channel_capacity);
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &RelayClientConfig {
        &self.inner.config
    }

    /// Bus carrying decoded frames and connection events
    pub fn events(&self) -> &Arc<EventBus<RelayEvent>> {
        &self.inner.events
    }

    /// True when both handles refer to the same client
    pub fn same_client(&self, other: &RelayClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Pairing uri of the current or last connection
    pub fn uri(&self) -> Option<String> {
        self.inner.state.lock().uri.clone()
    }

    /// Topic of the established session
    pub fn topic(&self) -> Option<String> {
        self.inner.state.lock().topic.clone()
    }

    pub fn set_topic(&self, topic: Option<String>) {
        self.inner.state.lock().topic = topic;
    }

    /// Address and chain sent in the `connect` handshake
    pub fn set_session_address(&self, address: impl Into<String>, chain_id: ChainId) {
        self.inner.state.lock().session_address = Some((address.into(), chain_id));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    /// Open the relay connection for pairing `uri`
    ///
    /// A no-op while connecting or connected.
    #[instrument(skip(self))]
    pub async fn connect(&self, uri: &str) -> Result<()> {
        let generation = {
            let mut state = self.inner.state.lock();
            if matches!(
                state.connection,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                debug!(state = ?state.connection, "Already connecting or connected");
                return Ok(());
            }
            state.uri = Some(uri.to_string());
            state.connection = ConnectionState::Connecting;
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        info!(uri = %uri, url = %self.inner.config.relay_url, "Connecting to relay");

        let connection = match self.inner.transport.open(&self.inner.config.relay_url).await {
            Ok(connection) => connection,
            Err(e) => {
                {
                    let mut state = self.inner.state.lock();
                    if self.is_current(generation) {
                        state.connection = ConnectionState::Disconnected;
                    }
                }
                error!(error = %e, "Relay connection failed");
                self.inner.events.emit(&RelayEvent::ConnectError(e.clone()));
                return Err(e.into());
            }
        };

        let Connection { writer, inbound } = connection;
        let handshake = {
            let mut state = self.inner.state.lock();
            if !self.is_current(generation) || state.connection != ConnectionState::Connecting {
                drop(state);
                debug!("Connection abandoned while opening");
                let _ = writer.try_send(WriteCommand::Close);
                return Err(ConnectError::NotConnected);
            }
            state.connection = ConnectionState::Connected;
            state.writer = Some(writer);
            state
                .session_address
                .clone()
                .map(|(address, chain_id)| {
                    OutboundMessage::Connect(ConnectData {
                        address,
                        chain_id,
                        uri: uri.to_string(),
                    })
                })
        };

        info!("Connected to relay");

        let reader = self.clone();
        tokio::spawn(async move {
            reader.read_loop(inbound, generation).await;
        });

        if let Some(message) = handshake {
            self.send(&message).await?;
        }

        Ok(())
    }

    async fn read_loop(self, mut inbound: mpsc::Receiver<TransportEvent>, generation: u64) {
        let mut exit = ReadExit::Completed;

        while let Some(event) = inbound.recv().await {
            if !self.is_current(generation) {
                exit = ReadExit::Superseded;
                break;
            }
            match event {
                TransportEvent::Frame(text) => self.handle_frame(&text),
                TransportEvent::Error(e) => {
                    if self.handle_transport_error(e) {
                        exit = ReadExit::Reset;
                        break;
                    }
                }
                TransportEvent::Closed => break,
            }
        }

        match exit {
            ReadExit::Completed => self.handle_closed(generation),
            ReadExit::Reset | ReadExit::Superseded => {
                debug!(generation, "Reader finished for replaced connection")
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping relay frame");
                return;
            }
        };

        debug!(
            event = frame.kind().as_str(),
            shape = frame.message().shape().as_str(),
            "Relay message"
        );

        if let Some((topic, _)) = frame.message().established() {
            self.set_topic(Some(topic.to_string()));
        }
        self.inner.events.emit(&RelayEvent::Message(frame));
    }

    /// Returns true when the connection was abandoned for a reconnect
    fn handle_transport_error(&self, e: TransportError) -> bool {
        let reconnect_uri = {
            let mut state = self.inner.state.lock();
            if e.is_peer_reset() && state.connection == ConnectionState::Connected {
                state.connection = ConnectionState::Disconnected;
                state.topic = None;
                state.writer = None;
                self.inner.generation.fetch_add(1, Ordering::SeqCst);
                state.uri.clone()
            } else {
                None
            }
        };

        match reconnect_uri {
            Some(uri) => {
                warn!(error = %e, uri = %uri, "Connection reset by peer, reconnecting");
                let client = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.connect(&uri).await {
                        error!(error = %e, "Reconnect failed");
                    }
                });
                true
            }
            None => {
                warn!(error = %e, "Relay transport error");
                self.inner.events.emit(&RelayEvent::ConnectError(e));
                false
            }
        }
    }

    fn handle_closed(&self, generation: u64) {
        {
            let mut state = self.inner.state.lock();
            if !self.is_current(generation) {
                return;
            }
            state.connection = ConnectionState::Disconnected;
            state.topic = None;
            state.writer = None;
        }

        info!("Relay connection closed");
        self.inner.events.emit(&RelayEvent::Closed);
    }

    /// Serialize and write one frame, returning once it is flushed
    pub async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let frame = serde_json::to_string(message)?;
        let writer = self
            .inner
            .state
            .lock()
            .writer
            .clone()
            .ok_or(ConnectError::NotConnected)?;

        let (ack, done) = oneshot::channel();
        writer
            .send(WriteCommand::Send { frame, ack })
            .await
            .map_err(|_| ConnectError::NotConnected)?;
        done.await
            .map_err(|_| TransportError::closed("writer stopped before acknowledging"))??;

        debug!(event = message.event(), "Sent relay message");
        Ok(())
    }

    /// Notify the relay and close the connection
    ///
    /// The final `disconnect` frame is best effort; waiting for it is bounded
    /// by the configured final message timeout.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, user_initiated: bool) -> Result<()> {
        let (writer, topic) = {
            let mut state = self.inner.state.lock();
            if matches!(
                state.connection,
                ConnectionState::Disconnected | ConnectionState::Disconnecting
            ) {
                debug!("Already disconnected");
                return Ok(());
            }
            state.connection = ConnectionState::Disconnecting;
            (state.writer.clone(), state.topic.clone())
        };

        if let Some(writer) = writer {
            let message = OutboundMessage::Disconnect(DisconnectData {
                topic,
                user_initiated,
            });
            match tokio::time::timeout(self.inner.config.final_message_timeout, self.send(&message))
                .await
            {
                Ok(Ok(())) => debug!("Final message delivered"),
                Ok(Err(e)) => warn!(error = %e, "Final message failed"),
                Err(_) => warn!("Timed out waiting for final message"),
            }
            let _ = writer.try_send(WriteCommand::Close);
        }

        {
            let mut state = self.inner.state.lock();
            state.connection = ConnectionState::Disconnected;
            state.topic = None;
            state.writer = None;
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
        }

        info!("Disconnected from relay");
        Ok(())
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RelayClient")
            .field("relay_url", &self.inner.config.relay_url)
            .field("state", &state.connection)
            .field("topic", &state.topic)
            .finish()
    }
}
