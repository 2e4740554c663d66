//! Transport abstraction for the relay connection
//!
//! A [`Transport`] opens a [`Connection`]: an outbound command channel served
//! by a single writer task, and an inbound event channel fed by a reader
//! task. Every frame is written by that one writer, so concurrent senders
//! queue instead of interleaving.

use crate::error::TransportError;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

pub mod memory;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::MemoryTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

/// Command for a connection's writer task
#[derive(Debug)]
pub enum WriteCommand {
    /// Write one text frame, acknowledging once it is flushed
    Send {
        frame: String,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Close the connection
    Close,
}

/// Event delivered by a connection's reader task
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A complete text frame
    Frame(String),
    /// The connection failed
    Error(TransportError),
    /// The connection completed
    Closed,
}

/// An open connection
#[derive(Debug)]
pub struct Connection {
    pub writer: mpsc::Sender<WriteCommand>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

impl Connection {
    pub fn new(writer: mpsc::Sender<WriteCommand>, inbound: mpsc::Receiver<TransportEvent>) -> Self {
        Self { writer, inbound }
    }
}

/// Opens connections to a relay endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url`
    async fn open(&self, url: &str) -> Result<Connection, TransportError>;
}
