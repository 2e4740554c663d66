//! WebSocket transport backed by tokio-tungstenite

use super::{Connection, Transport, TransportEvent, WriteCommand};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info};

/// Default capacity of the per-connection channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Relay transport over a WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    channel_capacity: usize,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the capacity of the inbound and outbound channels
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, _) = connect_async(url).await.map_err(TransportError::from)?;

        info!(url = %url, "Connected to relay WebSocket");

        let (mut sink, mut stream) = ws_stream.split();
        let (write_tx, mut write_rx) = mpsc::channel::<WriteCommand>(self.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(self.channel_capacity);

        // Writer task
        tokio::spawn(async move {
            while let Some(command) = write_rx.recv().await {
                match command {
                    WriteCommand::Send { frame, ack } => {
                        let result = sink
                            .send(Message::Text(frame))
                            .await
                            .map_err(TransportError::from);
                        let _ = ack.send(result);
                    }
                    WriteCommand::Close => {
                        debug!("Closing relay WebSocket");
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        // Reader task
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            debug!("Ignoring non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed by server");
                        break;
                    }
                    Ok(Message::Ping(_)) => {
                        debug!("Received ping");
                        continue;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!(error = %e, "WebSocket error");
                        let _ = event_tx.send(TransportEvent::Error(e.into())).await;
                        break;
                    }
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }

            let _ = event_tx.send(TransportEvent::Closed).await;
            info!("WebSocket disconnected");
        });

        Ok(Connection::new(write_tx, event_rx))
    }
}
