//! Fuzz tests for the event bus
//!
//! Random emit sequences across every provider event kind.

use portal_core::{BusEvent, Error, EventBus, ProviderEvent, ProviderEventKind, RequestPayload};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Strategies
// ============================================================================

const KINDS: [ProviderEventKind; 5] = [
    ProviderEventKind::Connect,
    ProviderEventKind::ChainChanged,
    ProviderEventKind::SigningRequested,
    ProviderEventKind::SigningApproved,
    ProviderEventKind::SigningRejected,
];

fn kind_strategy() -> impl Strategy<Value = ProviderEventKind> {
    prop::sample::select(KINDS.to_vec())
}

fn event_strategy() -> impl Strategy<Value = ProviderEvent> {
    (kind_strategy(), "[a-z0-9]{1,8}", any::<u64>()).prop_map(|(kind, id, chain)| {
        let chain_id = format!("{:#x}", chain);
        let payload = RequestPayload::new("personal_sign", vec![]).with_id(id);
        match kind {
            ProviderEventKind::Connect => ProviderEvent::Connect { chain_id },
            ProviderEventKind::ChainChanged => ProviderEvent::ChainChanged { chain_id },
            ProviderEventKind::SigningRequested => ProviderEvent::SigningRequested(payload),
            ProviderEventKind::SigningApproved => ProviderEvent::SigningApproved(payload),
            ProviderEventKind::SigningRejected => ProviderEvent::SigningRejected(payload),
        }
    })
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Emitting with nobody subscribed delivers nothing and registers nothing
    #[test]
    fn emit_without_subscribers_is_noop(events in prop::collection::vec(event_strategy(), 0..50)) {
        let bus = EventBus::<ProviderEvent>::new();

        for event in &events {
            prop_assert_eq!(bus.emit(event), 0);
        }
        for kind in KINDS {
            prop_assert_eq!(bus.listener_count(kind), 0);
        }
    }

    /// A once handler fires on the first matching emit only
    #[test]
    fn once_fires_at_most_once(
        kind in kind_strategy(),
        events in prop::collection::vec(event_strategy(), 0..50),
    ) {
        let bus = EventBus::<ProviderEvent>::new();
        let hits = counter();
        let durable = counter();

        let h = Arc::clone(&hits);
        bus.once(kind, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let d = Arc::clone(&durable);
        bus.on(kind, move |_| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for event in &events {
            bus.emit(event);
        }

        let matching = events.iter().filter(|e| e.kind() == kind).count();
        prop_assert_eq!(hits.load(Ordering::SeqCst), matching.min(1));
        prop_assert_eq!(durable.load(Ordering::SeqCst), matching);
        prop_assert_eq!(bus.listener_count(kind), if matching > 0 { 1 } else { 2 });
    }

    /// A failing once handler stays registered until it succeeds
    #[test]
    fn failed_once_handler_is_retried(
        failures in 0usize..5,
        emits in 0usize..10,
    ) {
        let bus = EventBus::<ProviderEvent>::new();
        let calls = counter();
        let successes = counter();

        let c = Arc::clone(&calls);
        let s = Arc::clone(&successes);
        bus.once(ProviderEventKind::ChainChanged, move |_| {
            if c.fetch_add(1, Ordering::SeqCst) < failures {
                return Err(Error::Handler("not ready".into()));
            }
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for _ in 0..emits {
            bus.emit(&ProviderEvent::ChainChanged { chain_id: "0x1".into() });
        }

        let succeeded = emits > failures;
        prop_assert_eq!(successes.load(Ordering::SeqCst), usize::from(succeeded));
        prop_assert_eq!(calls.load(Ordering::SeqCst), emits.min(failures + 1));
        prop_assert_eq!(bus.has_listeners(ProviderEventKind::ChainChanged), !succeeded);
    }

    /// A once handler that emits its own kind cannot fire twice
    #[test]
    fn reentrant_once_fires_once(depth in 1usize..5) {
        let bus = Arc::new(EventBus::<ProviderEvent>::new());
        let hits = counter();

        let weak = Arc::downgrade(&bus);
        let h = Arc::clone(&hits);
        bus.once(ProviderEventKind::ChainChanged, move |event| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(bus) = weak.upgrade() {
                for _ in 0..depth {
                    bus.emit(event);
                }
            }
            Ok(())
        });

        bus.emit(&ProviderEvent::ChainChanged { chain_id: "0x1".into() });
        bus.emit(&ProviderEvent::ChainChanged { chain_id: "0x2".into() });

        prop_assert_eq!(hits.load(Ordering::SeqCst), 1);
        prop_assert!(!bus.has_listeners(ProviderEventKind::ChainChanged));
    }
}
