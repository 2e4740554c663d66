//! Inbound frame decoding

use parking_lot::Mutex;
use portal_connect::{
    ConnectError, MemoryTransport, RelayClient, RelayClientConfig, RelayEvent, RelayEventKind,
    RelayMessage, RelayMessageKind, decode_frame,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_personal_sign_request() {
    let frame = r#"{"event":"session_request","data":{"id":"1","topic":"t1","params":{"request":{"method":"personal_sign","params":["0xdead"]}}}}"#;

    let frame = decode_frame(frame).unwrap();
    assert_eq!(frame.kind(), RelayMessageKind::SessionRequest);
    assert_eq!(frame.message().shape(), RelayMessageKind::SessionRequestAddress);

    let request = frame.message().session_request().unwrap();
    assert_eq!(request.id, "1");
    assert_eq!(request.topic, "t1");
    assert_eq!(request.method, "personal_sign");
    assert_eq!(request.params, vec![json!("0xdead")]);
    assert_eq!(request.chain_id, None);
}

#[test]
fn test_mixed_params_use_generic_request() {
    let frame = json!({
        "event": "session_request",
        "data": {
            "id": "9",
            "topic": "t1",
            "params": {
                "chainId": 137,
                "request": {
                    "method": "eth_signTypedData_v4",
                    "params": ["0xabc", { "types": {}, "domain": {} }]
                }
            }
        }
    });

    let frame = decode_frame(&frame.to_string()).unwrap();
    assert_eq!(frame.kind(), RelayMessageKind::SessionRequest);
    assert_eq!(frame.message().shape(), RelayMessageKind::SessionRequest);
    assert_eq!(frame.message().session_request().unwrap().chain_id, Some(137));
}

#[test]
fn test_connected_prefers_typed_metadata() {
    let typed = json!({
        "event": "connected",
        "data": { "topic": "t1", "peerMetadata": { "name": "Dapp", "url": "https://dapp.example" } }
    });
    let legacy = json!({
        "event": "connected",
        "data": { "topic": "t1", "peerMetadata": "Dapp" }
    });

    // Keyed by the wire name whichever shape matched
    let frame = decode_frame(&typed.to_string()).unwrap();
    assert_eq!(frame.kind(), RelayMessageKind::Connected);
    assert_eq!(frame.message().shape(), RelayMessageKind::ConnectedV1);

    let frame = decode_frame(&legacy.to_string()).unwrap();
    assert_eq!(frame.kind(), RelayMessageKind::Connected);
    assert_eq!(frame.message().shape(), RelayMessageKind::Connected);
    let (topic, metadata) = frame.message().established().unwrap();
    assert_eq!(topic, "t1");
    assert!(metadata.is_none());
}

#[test]
fn test_structural_fallback_without_event() {
    let frame = json!({
        "data": {
            "id": 3,
            "topic": "t1",
            "params": { "request": { "method": "eth_sendTransaction", "params": [{ "from": "0xabc" }] } }
        }
    });

    // Without an event name the frame is keyed by its shape
    let frame = decode_frame(&frame.to_string()).unwrap();
    assert_eq!(frame.kind(), RelayMessageKind::SessionRequestTransaction);
}

#[test]
fn test_unknown_event_name_keys_by_shape() {
    let frame = json!({
        "event": "portal_relayNotice",
        "data": { "message": "maintenance", "code": 1 }
    });

    let frame = decode_frame(&frame.to_string()).unwrap();
    assert_eq!(frame.kind(), RelayMessageKind::Error);
}

#[test]
fn test_disconnected_needs_its_event_name() {
    assert!(decode_frame(r#"{"data":{"topic":"t1"}}"#).is_err());

    let frame = decode_frame(r#"{"event":"disconnected","data":{"topic":"t1"}}"#).unwrap();
    assert_eq!(frame.kind(), RelayMessageKind::Disconnected);
}

#[test]
fn test_dapp_session_event_aliases() {
    for event in ["portal_dappSessionRequested", "dappSessionRequested"] {
        let frame = json!({
            "event": event,
            "data": {
                "id": "p1",
                "topic": "t1",
                "params": { "requiredNamespaces": { "eip155": { "chains": ["eip155:1"] } } }
            }
        });
        let frame = decode_frame(&frame.to_string()).unwrap();
        assert_eq!(frame.kind(), RelayMessageKind::DappSessionRequested);
    }
}

#[test]
fn test_unmatched_frames_fail_to_decode() {
    for frame in [
        r#"{"event":"mystery","data":{"x":1}}"#,
        r#"{"event":"session_request","data":{"id":"1","topic":"t1"}}"#,
        r#"{"event":"connected","data":{}}"#,
        r#"[1,2,3]"#,
        "not json",
    ] {
        assert!(
            matches!(decode_frame(frame), Err(ConnectError::ProtocolDecode(_))),
            "{frame} should not decode"
        );
    }
}

#[tokio::test]
async fn test_client_drops_unmatched_frames() {
    let transport = MemoryTransport::new();
    let client = RelayClient::new(
        RelayClientConfig::new("memory://relay"),
        Arc::new(transport.clone()),
    );
    client.connect("wc:a").await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let kinds = [
        RelayMessageKind::Connect,
        RelayMessageKind::ConnectedV1,
        RelayMessageKind::Connected,
        RelayMessageKind::Disconnected,
        RelayMessageKind::Close,
        RelayMessageKind::SessionRequest,
        RelayMessageKind::SessionRequestAddress,
        RelayMessageKind::SessionRequestTransaction,
        RelayMessageKind::DappSessionRequested,
        RelayMessageKind::Error,
    ];
    for kind in kinds {
        let sink = Arc::clone(&seen);
        client
            .events()
            .on(RelayEventKind::Message(kind), move |event| {
                sink.lock().push(event.clone());
                Ok(())
            });
    }

    assert!(transport.inject_frame(r#"{"event":"mystery","data":{"x":1}}"#).await);
    assert!(transport.inject_frame("not json").await);
    assert!(transport.inject_frame(r#"{"event":"error","data":{"message":"boom"}}"#).await);

    // Frames are handled in order, so the error arriving means the others were dropped
    tokio::time::timeout(Duration::from_secs(2), async {
        while seen.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("error frame should be delivered");

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        &seen[0],
        RelayEvent::Message(frame)
            if matches!(frame.message(), RelayMessage::Error(data) if data.message == "boom")
    ));
    assert!(client.is_connected());
}
