//! Handler Registry (C9): a deduplicated map of opaque user-supplied
//! registration ids to Pointer Bus tokens, plus a per-entity handle cache so
//! repeated `for(id)`-style lookups return the same handle.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use twinlink_core::sync::RwLock;
use twinlink_core::{trace_read_lock, trace_write_lock};

use crate::errors::ClientStateError;
use crate::pointer_bus::{PointerBus, Registration};

struct Inner {
    registrations: RwLock<HashMap<String, Registration>>,
    pointer_bus: PointerBus,
}

/// Tracks which Pointer Bus registration belongs to which user-facing
/// registration id, and rejects duplicate ids fast.
#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<Inner>,
}

impl HandlerRegistry {
    pub fn new(pointer_bus: PointerBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                registrations: RwLock::new(HashMap::new()),
                pointer_bus,
            }),
        }
    }

    /// Register `handler` under `registration_id` for `selector`. Fails if
    /// `registration_id` is already in use; the existing registration is
    /// left untouched.
    pub fn register(
        &self,
        registration_id: impl Into<String>,
        selector: &str,
        handler: impl Fn(&crate::change::Change, &HashMap<String, String>) + Send + Sync + 'static,
    ) -> Result<(), ClientStateError> {
        let registration_id = registration_id.into();
        let mut registrations = trace_write_lock!(self.inner.registrations);
        if registrations.contains_key(&registration_id) {
            return Err(ClientStateError::DuplicateRegistrationId(registration_id));
        }
        let token = self.inner.pointer_bus.on(selector, handler);
        registrations.insert(registration_id, token);
        Ok(())
    }

    /// Remove a previously-registered handler. Returns whether one existed.
    pub fn deregister(&self, registration_id: &str) -> bool {
        let token = trace_write_lock!(self.inner.registrations).remove(registration_id);
        match token {
            Some(token) => self.inner.pointer_bus.cancel(token),
            None => false,
        }
    }

    pub fn is_registered(&self, registration_id: &str) -> bool {
        trace_read_lock!(self.inner.registrations).contains_key(registration_id)
    }
}

/// A cache guaranteeing identity for repeated `for(key)` lookups: the same
/// key always yields the same cached handle, constructed at most once.
pub struct HandleCache<K, V> {
    entries: RwLock<HashMap<K, Arc<V>>>,
}

impl<K, V> Default for HandleCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> HandleCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn get_or_insert_with(&self, key: K, build: impl FnOnce() -> V) -> Arc<V> {
        let mut entries = trace_write_lock!(self.entries);
        entries.entry(key).or_insert_with(|| Arc::new(build())).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_id_fails_and_keeps_first_registration() {
        let registry = HandlerRegistry::new(PointerBus::new());
        registry.register("h1", "/things/{thingId}", |_, _| {}).unwrap();
        let result = registry.register("h1", "/things/{thingId}", |_, _| {});
        assert!(matches!(result, Err(ClientStateError::DuplicateRegistrationId(id)) if id == "h1"));
        assert!(registry.is_registered("h1"));
    }

    #[test]
    fn deregister_removes_and_cancels() {
        let registry = HandlerRegistry::new(PointerBus::new());
        registry.register("h1", "/things/{thingId}", |_, _| {}).unwrap();
        assert!(registry.deregister("h1"));
        assert!(!registry.is_registered("h1"));
        assert!(!registry.deregister("h1"));
    }

    #[test]
    fn handle_cache_returns_same_instance_for_same_key() {
        let cache: HandleCache<String, u32> = HandleCache::default();
        let a = cache.get_or_insert_with("thing1".to_string(), || 1);
        let b = cache.get_or_insert_with("thing1".to_string(), || 2);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, 1);
    }
}
