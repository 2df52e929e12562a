//! Identity registry: external id strings to compact numeric handles.
//!
//! Public keys, event ids and item names are long strings. Every component
//! that indexes them stores a [`Uid`] instead, handed out by one shared
//! [`Registry`]. Handles are dense, assigned on first sighting, and stable
//! for the life of the registry. The mapping is append-only.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A dense numeric handle for an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub u32);

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    by_str: HashMap<String, Uid>,
    strs: Vec<String>,
}

/// Thread-safe, append-only string interner.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `s`, assigning the next one on first sighting.
    pub fn intern(&self, s: &str) -> Uid {
        if let Some(uid) = self.lookup(s) {
            return uid;
        }
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        // Another writer may have interned it between the two locks.
        if let Some(uid) = inner.by_str.get(s) {
            return *uid;
        }
        let uid = Uid(inner.strs.len() as u32);
        inner.strs.push(s.to_string());
        inner.by_str.insert(s.to_string(), uid);
        uid
    }

    /// Return the handle for `s` without assigning one.
    pub fn lookup(&self, s: &str) -> Option<Uid> {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        inner.by_str.get(s).copied()
    }

    /// Resolve a handle back to its string.
    pub fn resolve(&self, uid: Uid) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        inner.strs.get(uid.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).strs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
