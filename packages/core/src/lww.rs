//! Last-write-wins registers with provenance.
//!
//! Trust edges and reaction index entries share one merge rule: the value
//! with the newest `created_at` wins, a tie keeps whichever arrived first, and
//! re-delivery of the event that produced the current value is a no-op except
//! that it promotes a local, optimistic value to `Confirmed`. On a tie a
//! network value also displaces a local, optimistic one, so a confirmation
//! carried by a different event (a zap receipt for our request) still lands. The rule is
//! commutative for distinct timestamps and idempotent, so replays and relay
//! reordering converge.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::registry::Uid;

/// Where a stored fact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Applied locally before the network echoed it back.
    LocalPending,
    /// Observed on the network.
    Confirmed,
}

/// A value stamped with the event that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T> {
    pub value: T,
    pub created_at: u64,
    pub event: Uid,
    pub provenance: Provenance,
}

impl<T> Stamped<T> {
    pub fn confirmed(value: T, created_at: u64, event: Uid) -> Self {
        Self {
            value,
            created_at,
            event,
            provenance: Provenance::Confirmed,
        }
    }

    pub fn pending(value: T, created_at: u64, event: Uid) -> Self {
        Self {
            value,
            created_at,
            event,
            provenance: Provenance::LocalPending,
        }
    }

    /// Fold `incoming` into `self`.
    pub fn merge(&mut self, incoming: Stamped<T>) -> Merge {
        if incoming.event == self.event {
            if self.provenance == Provenance::LocalPending
                && incoming.provenance == Provenance::Confirmed
            {
                self.provenance = Provenance::Confirmed;
                return Merge::Confirmed;
            }
            return Merge::Unchanged;
        }
        let confirms_tie = incoming.created_at == self.created_at
            && self.provenance == Provenance::LocalPending
            && incoming.provenance == Provenance::Confirmed;
        if incoming.created_at > self.created_at || confirms_tie {
            *self = incoming;
            return Merge::Replaced;
        }
        Merge::Unchanged
    }
}

/// What a merge did to the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Inserted,
    Replaced,
    /// Same event seen again; provenance promoted to `Confirmed`.
    Confirmed,
    Unchanged,
}

impl Merge {
    /// Whether the visible value changed.
    pub fn changed(self) -> bool {
        matches!(self, Merge::Inserted | Merge::Replaced)
    }
}

/// Merge `incoming` into the register stored under `key`.
pub fn merge_into<K: Eq + Hash, T>(
    map: &mut HashMap<K, Stamped<T>>,
    key: K,
    incoming: Stamped<T>,
) -> Merge {
    match map.get_mut(&key) {
        Some(existing) => existing.merge(incoming),
        None => {
            map.insert(key, incoming);
            Merge::Inserted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn latest_timestamp_wins_in_any_order() {
        let stamps = [5u64, 1, 9, 3];
        for order in permutations(&stamps) {
            let mut map = HashMap::new();
            for ts in &order {
                merge_into(&mut map, "k", Stamped::confirmed(*ts, *ts, Uid(*ts as u32)));
            }
            assert_eq!(map["k"].value, 9, "order {order:?}");
        }
    }

    #[test]
    fn reapplying_is_idempotent() {
        let mut map = HashMap::new();
        assert_eq!(merge_into(&mut map, 1, Stamped::confirmed("a", 10, Uid(1))), Merge::Inserted);
        assert_eq!(merge_into(&mut map, 1, Stamped::confirmed("a", 10, Uid(1))), Merge::Unchanged);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn tie_keeps_first_seen() {
        let mut slot = Stamped::confirmed("first", 10, Uid(1));
        assert_eq!(slot.merge(Stamped::confirmed("second", 10, Uid(2))), Merge::Unchanged);
        assert_eq!(slot.value, "first");
    }

    #[test]
    fn echo_confirms_pending() {
        let mut slot = Stamped::pending("mine", 10, Uid(1));
        assert_eq!(slot.merge(Stamped::confirmed("mine", 10, Uid(1))), Merge::Confirmed);
        assert_eq!(slot.provenance, Provenance::Confirmed);
        assert!(!Merge::Confirmed.changed());
    }

    #[test]
    fn confirmed_value_displaces_pending_on_a_tie() {
        let mut slot = Stamped::pending("request", 10, Uid(1));
        assert_eq!(slot.merge(Stamped::confirmed("receipt", 10, Uid(2))), Merge::Replaced);
        assert_eq!(slot.value, "receipt");
        assert_eq!(slot.provenance, Provenance::Confirmed);

        // A pending value never displaces a confirmed one on a tie.
        assert_eq!(slot.merge(Stamped::pending("late", 10, Uid(3))), Merge::Unchanged);
        assert_eq!(slot.value, "receipt");
    }

    #[test]
    fn older_confirmed_does_not_override_newer_pending() {
        let mut slot = Stamped::pending("new", 20, Uid(2));
        assert_eq!(slot.merge(Stamped::confirmed("old", 10, Uid(1))), Merge::Unchanged);
        assert_eq!(slot.value, "new");
        assert_eq!(slot.provenance, Provenance::LocalPending);
    }
}
