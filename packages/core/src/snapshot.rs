//! Serializable snapshots of graph and index state.
//!
//! [`Uid`](crate::registry::Uid)s only live as long as their registry, so
//! every record stores the original strings and is re-interned on restore.
//! Restoring goes through the normal merge path, which makes it idempotent
//! and safe to run over a graph that already holds newer data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Edge, TrustGraph};
use crate::lww::{Provenance, Stamped};
use crate::types::{EntityType, TrustValue};

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found}; expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub value: TrustValue,
    pub entity_type: EntityType,
    pub created_at: u64,
    pub event: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer: Option<String>,
    pub edges: Vec<EdgeRecord>,
}

/// One reaction index entry.
///
/// `key` is what the entry is unique by: the reactor for likes and reposts,
/// the reply event for replies, the zap request for zaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord<V> {
    pub target: String,
    pub key: String,
    pub actor: String,
    pub value: V,
    pub created_at: u64,
    pub event: String,
    pub provenance: Provenance,
}

impl TrustGraph {
    pub fn snapshot(&self) -> GraphSnapshot {
        let registry = self.registry();
        let mut edges: Vec<EdgeRecord> = self
            .edges()
            .filter_map(|(s, t, e)| {
                Some(EdgeRecord {
                    source: registry.resolve(s)?,
                    target: registry.resolve(t)?,
                    value: e.value.value,
                    entity_type: e.value.entity_type,
                    created_at: e.created_at,
                    event: registry.resolve(e.event)?,
                    provenance: e.provenance,
                })
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        GraphSnapshot {
            viewer: self.viewer().and_then(|v| registry.resolve(v)),
            edges,
        }
    }

    /// Merge a snapshot into this graph. Returns how many edges changed.
    ///
    /// The snapshot's viewer is only adopted when no viewer is set yet.
    pub fn restore(&mut self, snapshot: &GraphSnapshot) -> usize {
        if self.viewer().is_none() {
            if let Some(v) = &snapshot.viewer {
                let uid = self.registry().intern(v);
                self.set_viewer(uid);
            }
        }

        let mut changed = 0;
        for r in &snapshot.edges {
            let registry = self.registry();
            let (s, t, ev) = (
                registry.intern(&r.source),
                registry.intern(&r.target),
                registry.intern(&r.event),
            );
            let edge = Stamped {
                value: Edge {
                    value: r.value,
                    entity_type: r.entity_type,
                },
                created_at: r.created_at,
                event: ev,
                provenance: r.provenance,
            };
            if self.apply_edge(s, t, edge).changed() {
                changed += 1;
            }
        }
        changed
    }
}
