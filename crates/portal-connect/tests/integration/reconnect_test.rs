//! Relay client connection lifecycle and the peer-reset reconnect

use super::mocks::{RELAY_URL, eventually};
use parking_lot::Mutex;
use portal_connect::{
    ConnectionState, MemoryTransport, RelayClient, RelayClientConfig, RelayEvent, RelayEventKind,
    TransportError, TransportEvent,
};
use std::sync::Arc;
use std::time::Duration;

fn client() -> (RelayClient, MemoryTransport) {
    let transport = MemoryTransport::new();
    let client = RelayClient::new(
        RelayClientConfig::new(RELAY_URL).with_final_message_timeout(Duration::from_millis(200)),
        Arc::new(transport.clone()),
    );
    client.set_session_address("0xabc", 11_155_111);
    (client, transport)
}

fn record(client: &RelayClient, kind: RelayEventKind) -> Arc<Mutex<Vec<RelayEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.events().on(kind, move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    seen
}

fn handshakes(transport: &MemoryTransport) -> Vec<serde_json::Value> {
    transport
        .sent_json()
        .into_iter()
        .filter(|frame| frame["event"] == "connect")
        .collect()
}

#[tokio::test]
async fn test_peer_reset_reconnects_exactly_once() {
    let (client, transport) = client();
    let errors = record(&client, RelayEventKind::ConnectError);
    let closed = record(&client, RelayEventKind::Closed);

    client.connect("wc:a").await.unwrap();
    client.set_topic(Some("t1".into()));
    assert_eq!(transport.open_count(), 1);

    assert!(
        transport
            .inject(TransportEvent::Error(TransportError::peer_reset(
                "connection reset by peer"
            )))
            .await
    );

    eventually("reconnect", || {
        transport.open_count() == 2 && client.is_connected()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.open_count(), 2);
    assert_eq!(transport.opened_urls(), vec![RELAY_URL, RELAY_URL]);
    assert_eq!(client.uri().as_deref(), Some("wc:a"));
    assert_eq!(client.topic(), None);

    // The handshake is repeated for the same pairing uri
    let sent = handshakes(&transport);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1]["data"]["uri"], "wc:a");

    assert!(errors.lock().is_empty());
    assert!(closed.lock().is_empty());
}

#[tokio::test]
async fn test_failed_reconnect_is_not_retried() {
    let (client, transport) = client();
    let errors = record(&client, RelayEventKind::ConnectError);

    client.connect("wc:a").await.unwrap();
    transport.fail_next_open(TransportError::other("connection refused"));

    assert!(
        transport
            .inject(TransportEvent::Error(TransportError::peer_reset("reset")))
            .await
    );

    // The single attempt runs Disconnected -> Connecting and fails back to Disconnected
    eventually("reconnect attempt", || !errors.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(transport.open_count(), 1);
    assert_eq!(errors.lock().len(), 1);
}

#[tokio::test]
async fn test_other_errors_surface_without_reconnect() {
    let (client, transport) = client();
    let errors = record(&client, RelayEventKind::ConnectError);

    client.connect("wc:a").await.unwrap();
    assert!(
        transport
            .inject(TransportEvent::Error(TransportError::other("tls alert")))
            .await
    );

    eventually("connect error", || !errors.lock().is_empty()).await;

    assert_eq!(
        errors.lock()[0],
        RelayEvent::ConnectError(TransportError::other("tls alert"))
    );
    assert_eq!(transport.open_count(), 1);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_transport_close_clears_topic() {
    let (client, transport) = client();
    let closed = record(&client, RelayEventKind::Closed);

    client.connect("wc:a").await.unwrap();
    client.set_topic(Some("t1".into()));
    assert!(transport.inject(TransportEvent::Closed).await);

    eventually("close", || !closed.lock().is_empty()).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.topic(), None);
    assert_eq!(closed.lock().len(), 1);

    // A closed client can connect again
    client.connect("wc:a").await.unwrap();
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test]
async fn test_explicit_disconnect_emits_no_close() {
    let (client, transport) = client();
    let closed = record(&client, RelayEventKind::Closed);

    client.connect("wc:a").await.unwrap();
    client.disconnect(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.close_count(), 1);
    assert!(closed.lock().is_empty());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_concurrent_sends_are_not_interleaved() {
    let (client, transport) = client();
    client.connect("wc:a").await.unwrap();
    transport.clear_sent();

    let mut tasks = Vec::new();
    for i in 0..20 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client
                .send(&portal_connect::OutboundMessage::signature_received(
                    "t1",
                    i.to_string(),
                    "0xsig",
                ))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let frames = transport.sent_json();
    assert_eq!(frames.len(), 20);
    assert!(frames.iter().all(|f| f["event"] == "signatureReceived"));
}
