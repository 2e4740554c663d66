//! In-memory transport for testing and local development

use super::{Connection, Transport, TransportEvent, WriteCommand};
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};

type Ack = oneshot::Sender<Result<(), TransportError>>;

/// In-memory relay transport
///
/// Records every opened endpoint and written frame, and lets a test play the
/// relay by injecting inbound events into the most recent connection.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    opened: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    current: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    fail_next_open: Mutex<Option<TransportError>>,
    /// Acks held back while writes are stalled
    stalled: Mutex<Vec<Ack>>,
    stall_writes: AtomicBool,
    closes: AtomicUsize,
    /// Notification channel for new frames
    notify: broadcast::Sender<()>,
    capacity: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1000);
        Self {
            inner: Arc::new(MemoryInner {
                opened: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                current: Mutex::new(None),
                fail_next_open: Mutex::new(None),
                stalled: Mutex::new(Vec::new()),
                stall_writes: AtomicBool::new(false),
                closes: AtomicUsize::new(0),
                notify,
                capacity: 64,
            }),
        }
    }

    /// Number of connections opened so far
    pub fn open_count(&self) -> usize {
        self.inner.opened.lock().len()
    }

    /// Endpoints opened, in order
    pub fn opened_urls(&self) -> Vec<String> {
        self.inner.opened.lock().clone()
    }

    /// Number of connections closed by their owner
    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Make the next `open` fail with `error`
    pub fn fail_next_open(&self, error: TransportError) {
        *self.inner.fail_next_open.lock() = Some(error);
    }

    /// Hold write acknowledgements back, as an unresponsive peer would
    pub fn set_stall_writes(&self, stall: bool) {
        self.inner.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// Frames written so far, across all connections
    pub fn sent_frames(&self) -> Vec<String> {
        self.inner.sent.lock().clone()
    }

    /// Frames written so far, parsed as JSON
    pub fn sent_json(&self) -> Vec<Value> {
        self.inner
            .sent
            .lock()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Forget recorded frames
    pub fn clear_sent(&self) {
        self.inner.sent.lock().clear();
    }

    /// Deliver an event on the most recent connection
    pub async fn inject(&self, event: TransportEvent) -> bool {
        let current = self.inner.current.lock().clone();
        match current {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver a text frame on the most recent connection
    pub async fn inject_frame(&self, frame: impl Into<String>) -> bool {
        self.inject(TransportEvent::Frame(frame.into())).await
    }

    /// Wait until at least `count` frames have been written
    pub async fn wait_for_sent(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<String>, TransportError> {
        let mut rx = self.inner.notify.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            {
                let sent = self.inner.sent.lock();
                if sent.len() >= count {
                    return Ok(sent.clone());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::other(format!(
                    "Waiting for {} written frames",
                    count
                )));
            }

            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep(Duration::from_millis(20).min(remaining)) => continue,
            }
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<Connection, TransportError> {
        if let Some(error) = self.inner.fail_next_open.lock().take() {
            return Err(error);
        }

        self.inner.opened.lock().push(url.to_string());

        let (write_tx, mut write_rx) = mpsc::channel::<WriteCommand>(self.inner.capacity);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(self.inner.capacity);
        *self.inner.current.lock() = Some(event_tx.clone());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(command) = write_rx.recv().await {
                match command {
                    WriteCommand::Send { frame, ack } => {
                        if inner.stall_writes.load(Ordering::SeqCst) {
                            inner.stalled.lock().push(ack);
                            continue;
                        }
                        inner.sent.lock().push(frame);
                        let _ = inner.notify.send(());
                        let _ = ack.send(Ok(()));
                    }
                    WriteCommand::Close => {
                        inner.closes.fetch_add(1, Ordering::SeqCst);
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        break;
                    }
                }
            }
        });

        Ok(Connection::new(write_tx, event_rx))
    }
}
