//! Property-based checks for the two bus invariants named in the
//! testable-properties notes: a registration's id space is a true
//! dictionary (no case where a second writer could silently clobber it),
//! and a pointer-bus selector captures exactly the thing id present in the
//! notified path, for any syntactically valid id.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use twinlink_client::change::{Change, ChangeAction};
use twinlink_client::pointer_bus::PointerBus;

fn thing_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9._-]{0,31}"
}

fn sample_change(entity_id: &str) -> Change {
    Change {
        entity_id: entity_id.to_string(),
        action: ChangeAction::Updated,
        relative_path: "/value".to_string(),
        value: Some(serde_json::json!(1)),
        revision: 1,
        timestamp: None,
        extra: None,
    }
}

proptest! {
    /// For any thing id made of the characters the addressing scheme
    /// allows, a selector registered for the attributes family captures
    /// exactly that id back out, and fires exactly once.
    #[test]
    fn selector_captures_any_valid_thing_id(thing_id in thing_id_strategy()) {
        let bus = PointerBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        let captured_clone = captured.clone();
        bus.on("/things/{thingId}/attributes", move |_change, captures| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            *captured_clone.lock().unwrap() = captures.get("thingId").cloned();
        });

        let pointer = format!("/things/{thing_id}/attributes");
        bus.notify(&pointer, &sample_change(&thing_id));

        prop_assert_eq!(seen.load(Ordering::SeqCst), 1);
        prop_assert_eq!(captured.lock().unwrap().clone(), Some(thing_id));
    }

    /// A selector never fires for a pointer belonging to a different thing,
    /// regardless of which two (distinct) ids are chosen.
    #[test]
    fn selector_does_not_cross_thing_boundaries(
        registered_id in thing_id_strategy(),
        notified_id in thing_id_strategy(),
    ) {
        prop_assume!(registered_id != notified_id);
        let bus = PointerBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let selector = format!("/things/{registered_id}/attributes");
        bus.on(&selector, move |_, _| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let pointer = format!("/things/{notified_id}/attributes");
        bus.notify(&pointer, &sample_change(&notified_id));

        prop_assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn duplicate_registration_ids_are_rejected_deterministically() {
    use twinlink_client::handler_registry::HandlerRegistry;

    let registry = HandlerRegistry::new(PointerBus::new());
    let outcomes: Vec<(&str, bool)> = [("h1", true), ("h1", false), ("h2", true)]
        .into_iter()
        .map(|(id, expect_ok)| {
            let result = registry.register(id, "/things/{thingId}", |_, _| {});
            (id, result.is_ok() == expect_ok)
        })
        .collect();
    for (id, matched_expectation) in outcomes {
        assert!(matched_expectation, "unexpected registration outcome for {id}");
    }
}
