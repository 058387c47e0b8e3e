//! The user-facing notification record produced by the Change Dispatcher and
//! delivered through the Pointer Bus.

use serde_json::Value;

/// What happened to the addressed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
    Merged,
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub entity_id: String,
    pub action: ChangeAction,
    /// JSON pointer relative to the addressed resource, e.g. `/temperature`
    /// for an attribute change, or `""` for a whole-resource change.
    pub relative_path: String,
    pub value: Option<Value>,
    pub revision: i64,
    pub timestamp: Option<String>,
    pub extra: Option<Value>,
}
