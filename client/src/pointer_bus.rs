//! Pointer Bus (C4): a hierarchical JSON-pointer selector pub/sub that
//! translates protocol-level entity events into change notifications.
//!
//! Selectors are JSON pointers with `{placeholder}` segments that capture
//! exactly one path segment each (`/things/{thingId}/attributes{path}` is
//! not itself a placeholder pattern past the fixed prefix; only bare
//! `{name}` segments are wildcards). Dispatch takes a snapshot of the
//! registration table under lock and then invokes handlers outside the
//! lock, so registrations can freely add or remove themselves from within
//! a handler without deadlocking.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use twinlink_core::handle::AtomicHandle;
use twinlink_core::sync::RwLock;
use twinlink_core::{trace_read_lock, trace_write_lock};

use crate::change::Change;

/// Token returned from [`PointerBus::on`]; dropping it does not cancel the
/// registration; call [`PointerBus::cancel`] explicitly.
pub type Registration = u64;

type Handler = Arc<dyn Fn(&Change, &HashMap<String, String>) + Send + Sync>;

struct Selector {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

impl Selector {
    fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                if segment.starts_with('{') && segment.ends_with('}') {
                    Segment::Placeholder(segment[1..segment.len() - 1].to_string())
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Try to match `pointer` against this selector, returning the captured
    /// placeholder values on success.
    ///
    /// A selector matches only a pointer with exactly as many segments as
    /// the selector. `resolve_family` always collapses a pointer to the
    /// exact root of its address family before notifying, so a Thing-scope
    /// selector like `/things/{thingId}` must not also match an
    /// Attributes/Features/PolicyId pointer nested under that root; each
    /// family keeps its own selector.
    fn try_match(&self, pointer_segments: &[&str]) -> Option<HashMap<String, String>> {
        if pointer_segments.len() != self.segments.len() {
            return None;
        }
        let mut captures = HashMap::new();
        for (selector_segment, pointer_segment) in self.segments.iter().zip(pointer_segments) {
            match selector_segment {
                Segment::Literal(literal) => {
                    if literal != pointer_segment {
                        return None;
                    }
                }
                Segment::Placeholder(name) => {
                    captures.insert(name.clone(), pointer_segment.to_string());
                }
            }
        }
        Some(captures)
    }
}

struct Entry {
    selector: Selector,
    handler: Handler,
}

struct Inner {
    entries: RwLock<HashMap<Registration, Entry>>,
    ids: AtomicHandle,
}

/// The hierarchical selector pub/sub. Cheap to clone.
#[derive(Clone)]
pub struct PointerBus {
    inner: Arc<Inner>,
}

impl Default for PointerBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                ids: AtomicHandle::new(1),
            }),
        }
    }

    /// Register a handler for every change whose path matches `selector`.
    pub fn on(
        &self,
        selector: &str,
        handler: impl Fn(&Change, &HashMap<String, String>) + Send + Sync + 'static,
    ) -> Registration {
        let registration = self.inner.ids.next();
        let entry = Entry {
            selector: Selector::parse(selector),
            handler: Arc::new(handler),
        };
        trace_write_lock!(self.inner.entries).insert(registration, entry);
        registration
    }

    /// Cancel a registration previously returned by [`PointerBus::on`].
    pub fn cancel(&self, registration: Registration) -> bool {
        trace_write_lock!(self.inner.entries)
            .remove(&registration)
            .is_some()
    }

    /// Dispatch `change` to every selector matching `pointer`, passing each
    /// handler the placeholder captures resolved for its own selector.
    pub fn notify(&self, pointer: &str, change: &Change) {
        let segments: Vec<&str> = pointer.split('/').filter(|s| !s.is_empty()).collect();
        let matches: Vec<(Handler, HashMap<String, String>)> = {
            let entries = trace_read_lock!(self.inner.entries);
            entries
                .values()
                .filter_map(|entry| {
                    entry
                        .selector
                        .try_match(&segments)
                        .map(|captures| (entry.handler.clone(), captures))
                })
                .collect()
        };
        if matches.is_empty() {
            trace!("no pointer bus subscriber matched {pointer}");
        }
        for (handler, captures) in matches {
            handler(change, &captures);
        }
    }
}
