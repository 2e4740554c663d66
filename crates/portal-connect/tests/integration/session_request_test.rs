//! Dapp requests routed through the provider and answered on the relay

use super::mocks::{FixedSigner, establish, eventually, fixture, sent_events};
use portal_core::{ProviderConfig, ProviderEvent, ProviderEventKind, SigningError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PERSONAL_SIGN: &str = r#"{"event":"session_request","data":{"id":"1","topic":"t1","params":{"request":{"method":"personal_sign","params":["0xdead"]}}}}"#;

fn received(hash: &str) -> serde_json::Value {
    json!({
        "event": "signatureReceived",
        "data": { "topic": "t1", "transactionHash": hash, "transactionId": "1" }
    })
}

fn rejected() -> serde_json::Value {
    json!({
        "event": "portal_signatureRejected",
        "data": { "topic": "t1", "transactionHash": "", "transactionId": "1" }
    })
}

/// Wait for the single answer to request "1", then check no second one follows
async fn single_answer(f: &super::mocks::Fixture) -> serde_json::Value {
    eventually("answer", || {
        !sent_events(&f.transport, "signatureReceived").is_empty()
            || !sent_events(&f.transport, "portal_signatureRejected").is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut answers = sent_events(&f.transport, "signatureReceived");
    answers.extend(sent_events(&f.transport, "portal_signatureRejected"));
    assert_eq!(answers.len(), 1, "exactly one answer per request: {answers:?}");
    answers.remove(0)
}

#[tokio::test]
async fn test_personal_sign_is_answered_with_signature() {
    let f = fixture(
        ProviderConfig::default().with_auto_approve(true),
        FixedSigner::signing("0xsig"),
        &[],
    )
    .await;
    establish(&f, "wc:a", "t1").await;

    assert!(f.transport.inject_frame(PERSONAL_SIGN).await);

    assert_eq!(single_answer(&f).await, received("0xsig"));

    let calls = f.signer.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "personal_sign");
    assert_eq!(calls[0].params, vec![json!("0xdead")]);
    assert_eq!(calls[0].chain_id, 11_155_111);
}

#[tokio::test]
async fn test_signing_failure_is_answered_with_rejection() {
    let f = fixture(
        ProviderConfig::default().with_auto_approve(true),
        FixedSigner::failing(SigningError::new("user rejected the request")),
        &[],
    )
    .await;
    establish(&f, "wc:a", "t1").await;

    assert!(f.transport.inject_frame(PERSONAL_SIGN).await);

    assert_eq!(single_answer(&f).await, rejected());
    assert_eq!(f.connect.pending_requests(), 0);
}

#[tokio::test]
async fn test_host_rejection_is_answered_once() {
    let f = fixture(ProviderConfig::default(), FixedSigner::signing("0xsig"), &[]).await;
    establish(&f, "wc:a", "t1").await;

    let events = Arc::downgrade(f.provider.events());
    f.provider
        .events()
        .on(ProviderEventKind::SigningRequested, move |event| {
            if let (Some(events), Some(payload)) = (events.upgrade(), event.payload()) {
                events.emit(&ProviderEvent::SigningRejected(payload.clone()));
            }
            Ok(())
        });

    assert!(f.transport.inject_frame(PERSONAL_SIGN).await);

    assert_eq!(single_answer(&f).await, rejected());
    assert!(f.signer.calls.lock().is_empty());
}

#[tokio::test]
async fn test_rejection_while_route_is_pending() {
    let f = fixture(ProviderConfig::default(), FixedSigner::signing("0xsig"), &[]).await;
    establish(&f, "wc:a", "t1").await;
    f.provider
        .events()
        .on(ProviderEventKind::SigningRequested, |_| Ok(()));

    assert!(f.transport.inject_frame(PERSONAL_SIGN).await);
    eventually("approval wait", || f.provider.pending_approvals() == 1).await;
    assert!(sent_events(&f.transport, "portal_signatureRejected").is_empty());

    let payload = portal_core::RequestPayload::new("personal_sign", vec![]).with_id("1");
    f.provider
        .events()
        .emit(&ProviderEvent::SigningRejected(payload));

    assert_eq!(single_answer(&f).await, rejected());
    assert_eq!(f.provider.pending_approvals(), 0);

    // The request-scoped rejection listener is gone with the request
    eventually("rejection listeners removed", || {
        f.provider
            .events()
            .listener_count(ProviderEventKind::SigningRejected)
            == 0
    })
    .await;
}

#[tokio::test]
async fn test_rejection_from_host_thread() {
    let f = fixture(ProviderConfig::default(), FixedSigner::signing("0xsig"), &[]).await;
    establish(&f, "wc:a", "t1").await;
    f.provider
        .events()
        .on(ProviderEventKind::SigningRequested, |_| Ok(()));

    assert!(f.transport.inject_frame(PERSONAL_SIGN).await);
    eventually("approval wait", || f.provider.pending_approvals() == 1).await;

    // Host apps may decide on their own threads
    let provider = Arc::clone(&f.provider);
    std::thread::spawn(move || {
        let payload = portal_core::RequestPayload::new("personal_sign", vec![]).with_id("1");
        provider
            .events()
            .emit(&ProviderEvent::SigningRejected(payload));
    })
    .join()
    .expect("host thread");

    assert_eq!(single_answer(&f).await, rejected());
    assert_eq!(f.provider.pending_approvals(), 0);
    assert!(f.signer.calls.lock().is_empty());
}

#[tokio::test]
async fn test_answer_dropped_after_client_replaced() {
    let f = fixture(ProviderConfig::default(), FixedSigner::signing("0xsig"), &[]).await;
    establish(&f, "wc:a", "t1").await;
    f.provider
        .events()
        .on(ProviderEventKind::SigningRequested, |_| Ok(()));

    assert!(f.transport.inject_frame(PERSONAL_SIGN).await);
    eventually("approval wait", || f.provider.pending_approvals() == 1).await;

    // Pairing again cancels the wait; its rejection belongs to the old relay session
    establish(&f, "wc:b", "t2").await;
    eventually("request settled", || f.connect.pending_requests() == 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(sent_events(&f.transport, "portal_signatureRejected").is_empty());
    assert!(sent_events(&f.transport, "signatureReceived").is_empty());
}

#[tokio::test]
async fn test_no_binding_is_answered_with_rejection() {
    let f = fixture(ProviderConfig::default(), FixedSigner::signing("0xsig"), &[]).await;
    establish(&f, "wc:a", "t1").await;

    assert!(f.transport.inject_frame(PERSONAL_SIGN).await);

    assert_eq!(single_answer(&f).await, rejected());
}

#[tokio::test]
async fn test_unsupported_method_is_answered_with_rejection() {
    let f = fixture(
        ProviderConfig::default().with_auto_approve(true),
        FixedSigner::signing("0xsig"),
        &[],
    )
    .await;
    establish(&f, "wc:a", "t1").await;

    let frame = json!({
        "event": "session_request",
        "data": {
            "id": "1",
            "topic": "t1",
            "params": { "request": { "method": "solana_signMessage", "params": ["0xdead"] } }
        }
    });
    assert!(f.transport.inject_frame(frame.to_string()).await);

    assert_eq!(single_answer(&f).await, rejected());
}

#[tokio::test]
async fn test_transaction_request_uses_request_chain() {
    let f = fixture(
        ProviderConfig::default().with_auto_approve(true),
        FixedSigner::signing("0xtxhash"),
        &[],
    )
    .await;
    establish(&f, "wc:a", "t1").await;

    let frame = json!({
        "event": "session_request",
        "data": {
            "id": 1,
            "topic": "t1",
            "params": {
                "chainId": "eip155:5",
                "request": {
                    "method": "eth_sendTransaction",
                    "params": [{ "from": "0xabc", "to": "0xdef", "value": "0x1" }]
                }
            }
        }
    });
    assert!(f.transport.inject_frame(frame.to_string()).await);

    assert_eq!(single_answer(&f).await, received("0xtxhash"));

    let calls = f.signer.calls.lock();
    assert_eq!(calls[0].chain_id, 5);
    assert_eq!(
        calls[0].params,
        vec![json!({ "from": "0xabc", "to": "0xdef", "value": "0x1" })]
    );
}

#[tokio::test]
async fn test_gateway_result_is_relayed() {
    let f = fixture(ProviderConfig::default(), FixedSigner::signing("0xsig"), &[]).await;
    establish(&f, "wc:a", "t1").await;

    let frame = json!({
        "event": "session_request",
        "data": {
            "id": "1",
            "topic": "t1",
            "params": { "request": { "method": "eth_blockNumber", "params": [] } }
        }
    });
    assert!(f.transport.inject_frame(frame.to_string()).await);

    assert_eq!(single_answer(&f).await, received("0x10"));
    assert!(f.signer.calls.lock().is_empty());
}
