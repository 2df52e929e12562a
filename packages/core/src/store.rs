//! Canonical event records keyed by numeric id.
//!
//! The store is the leaf dependency of the engine: everything ingested lands
//! here first, and the reply and repost indices consult it to decide whether a
//! reaction's target is known yet. Records are never mutated; a second
//! delivery of the same id is reported as a duplicate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::registry::{Registry, Uid};
use crate::types::Event;

/// Result of [`EventStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    New(Uid),
    Duplicate(Uid),
}

impl Inserted {
    pub fn uid(self) -> Uid {
        match self {
            Inserted::New(uid) | Inserted::Duplicate(uid) => uid,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Inserted::New(_))
    }
}

pub struct EventStore {
    registry: Arc<Registry>,
    events: RwLock<HashMap<Uid, Event>>,
}

impl EventStore {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Store `event` unless its id is already present.
    pub fn insert(&self, event: Event) -> Inserted {
        let uid = self.registry.intern(&event.id);
        let mut events = self.events.write().unwrap_or_else(|p| p.into_inner());
        if events.contains_key(&uid) {
            return Inserted::Duplicate(uid);
        }
        events.insert(uid, event);
        Inserted::New(uid)
    }

    pub fn get(&self, uid: Uid) -> Option<Event> {
        let events = self.events.read().unwrap_or_else(|p| p.into_inner());
        events.get(&uid).cloned()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Event> {
        self.registry.lookup(id).and_then(|uid| self.get(uid))
    }

    pub fn contains(&self, uid: Uid) -> bool {
        let events = self.events.read().unwrap_or_else(|p| p.into_inner());
        events.contains_key(&uid)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.registry.lookup(id).is_some_and(|uid| self.contains(uid))
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::kinds;

    fn event(id: &str) -> Event {
        Event {
            id: id.into(),
            pubkey: "ab".repeat(32),
            created_at: 1,
            kind: kinds::TEXT_NOTE,
            tags: vec![],
            content: "hello".into(),
            sig: String::new(),
        }
    }

    #[test]
    fn insert_then_duplicate() {
        let store = EventStore::new(Arc::new(Registry::new()));
        let first = store.insert(event("e1"));
        assert!(first.is_new());
        let second = store.insert(event("e1"));
        assert_eq!(second, Inserted::Duplicate(first.uid()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lookup_by_string_id() {
        let store = EventStore::new(Arc::new(Registry::new()));
        store.insert(event("e1"));
        assert!(store.contains_id("e1"));
        assert!(!store.contains_id("e2"));
        assert_eq!(store.get_by_id("e1").map(|e| e.content), Some("hello".into()));
    }
}
