//! Change Dispatcher (C8): listens for inbound twin/live event adaptables on
//! the Adaptable Bus and, for each, resolves the addressing-scheme family it
//! belongs to and notifies the Pointer Bus.
//!
//! The family-level pointer (e.g. `/things/{id}/attributes`) is what
//! handlers select against; the specific path within that family (e.g.
//! `/temperature`) travels as [`Change::relative_path`] rather than as a
//! pointer-bus placeholder, since it is open-ended rather than a single
//! captured segment.

use serde_json::Value;

use crate::adaptable::{Adaptable, StreamingType};
use crate::bus::AdaptableBus;
use crate::change::{Change, ChangeAction};
use crate::pointer_bus::PointerBus;

/// Subscribe the dispatcher to twin and live events on `bus`, forwarding
/// resolved changes to `pointer_bus`.
pub fn install(bus: &AdaptableBus, pointer_bus: PointerBus) {
    let forward = pointer_bus.clone();
    bus.subscribe_for_adaptable(StreamingType::TwinEvent, move |adaptable| {
        dispatch(&forward, &adaptable);
    });
    bus.subscribe_for_adaptable(StreamingType::LiveEvent, move |adaptable| {
        dispatch(&pointer_bus, &adaptable);
    });
}

fn dispatch(pointer_bus: &PointerBus, adaptable: &Adaptable) {
    let Some(action) = classify_action(&adaptable.topic_path.action) else {
        return;
    };
    let entity_id = &adaptable.topic_path.entity_id;
    let path = payload_path(&adaptable.payload).unwrap_or_default();
    let revision = payload_i64(&adaptable.payload, "revision").unwrap_or(0);
    let timestamp = payload_str(&adaptable.payload, "timestamp");
    let value = adaptable.payload.get("value").cloned();
    let extra = adaptable.extra.clone();

    let (family, relative_path) = resolve_family(entity_id, &path);

    let change = Change {
        entity_id: entity_id.clone(),
        action,
        relative_path,
        value,
        revision,
        timestamp,
        extra,
    };
    pointer_bus.notify(&family, &change);
}

fn classify_action(action: &str) -> Option<ChangeAction> {
    match action {
        "created" => Some(ChangeAction::Created),
        "modified" => Some(ChangeAction::Updated),
        "deleted" => Some(ChangeAction::Deleted),
        "merged" => Some(ChangeAction::Merged),
        _ => None,
    }
}

fn payload_path(payload: &Value) -> Option<String> {
    payload.get("path").and_then(Value::as_str).map(str::to_string)
}

fn payload_i64(payload: &Value, key: &str) -> Option<i64> {
    payload.get(key).and_then(Value::as_i64)
}

fn payload_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Resolve a twin/live event's `path` field into (family pointer, relative
/// path within that family), per the addressing scheme.
fn resolve_family(entity_id: &str, path: &str) -> (String, String) {
    let root = format!("/things/{entity_id}");
    let trimmed = path.trim_start_matches('/');
    let segments: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    };

    match segments.as_slice() {
        [] => (root, String::new()),
        ["definition"] => (format!("{root}/definition"), String::new()),
        ["policyId"] => (format!("{root}/policyId"), String::new()),
        ["attributes"] => (format!("{root}/attributes"), String::new()),
        ["attributes", rest @ ..] => (
            format!("{root}/attributes"),
            format!("/{}", rest.join("/")),
        ),
        ["features"] => (format!("{root}/features"), String::new()),
        ["features", feature_id] => (format!("{root}/features/{feature_id}"), String::new()),
        ["features", feature_id, "definition"] => {
            (format!("{root}/features/{feature_id}/definition"), String::new())
        }
        ["features", feature_id, "properties"] => (
            format!("{root}/features/{feature_id}/properties"),
            String::new(),
        ),
        ["features", feature_id, "properties", rest @ ..] => (
            format!("{root}/features/{feature_id}/properties"),
            format!("/{}", rest.join("/")),
        ),
        ["features", feature_id, "desiredProperties"] => (
            format!("{root}/features/{feature_id}/desiredProperties"),
            String::new(),
        ),
        ["features", feature_id, "desiredProperties", rest @ ..] => (
            format!("{root}/features/{feature_id}/desiredProperties"),
            format!("/{}", rest.join("/")),
        ),
        _ => (root.clone(), format!("/{}", segments.join("/"))),
    }
}
