//! The trust graph and bounded-degree trust scores.
//!
//! The graph holds at most one live edge per `(source, target)` pair, merged
//! with the last-write-wins rule from [`lww`](crate::lww). A neutral edge is
//! kept for audit but contributes nothing.
//!
//! Scores are computed by a breadth-first walk from the viewer over `+1` key
//! edges, hard-capped at [`MAX_DEGREE`]. Every assessor is attributed to its
//! minimum distance from the viewer, so an assessor reachable along several
//! paths is counted once. The cap keeps the walk within O(out-degree²) on a
//! graph of arbitrary size; it is not configurable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assertion::TrustAssertion;
use crate::lww::{Merge, Stamped};
use crate::registry::{Registry, Uid};
use crate::types::{EntityType, Event, TrustValue};

/// Deepest trust distance that contributes to a score.
pub const MAX_DEGREE: usize = 2;

/// The payload of one trust edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub value: TrustValue,
    pub entity_type: EntityType,
}

/// Per-degree tally of trust and distrust for one entity.
///
/// Index 0 is the viewer's own opinion, 1 the opinions of identities the
/// viewer trusts directly, 2 those one step further out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustScore {
    pub trusts: [u32; MAX_DEGREE + 1],
    pub distrusts: [u32; MAX_DEGREE + 1],
}

impl TrustScore {
    /// No signal at any degree.
    pub fn is_empty(&self) -> bool {
        self.trusts.iter().chain(self.distrusts.iter()).all(|n| *n == 0)
    }

    pub fn total_trusts(&self) -> u32 {
        self.trusts.iter().sum()
    }

    pub fn total_distrusts(&self) -> u32 {
        self.distrusts.iter().sum()
    }
}

/// One assessor's contribution to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub assessor: Uid,
    pub degree: usize,
    pub value: TrustValue,
}

struct DistanceCache {
    generation: u64,
    viewer: Uid,
    distances: Arc<HashMap<Uid, usize>>,
}

pub struct TrustGraph {
    registry: Arc<Registry>,
    viewer: Option<Uid>,
    edges: HashMap<(Uid, Uid), Stamped<Edge>>,
    outgoing: HashMap<Uid, HashSet<Uid>>,
    incoming: HashMap<Uid, HashSet<Uid>>,
    generation: u64,
    cache: Mutex<Option<DistanceCache>>,
}

impl TrustGraph {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            viewer: None,
            edges: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            generation: 0,
            cache: Mutex::new(None),
        }
    }

    /// Set the identity whose degree-0 opinions `is_trusted` answers for.
    pub fn set_viewer(&mut self, viewer: Uid) {
        self.viewer = Some(viewer);
    }

    pub fn viewer(&self) -> Option<Uid> {
        self.viewer
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Ingest a trust-assertion event observed on the network.
    ///
    /// Malformed assertions are logged and ignored.
    pub fn ingest(&mut self, event: &Event, event_uid: Uid) -> Merge {
        match TrustAssertion::from_event(event) {
            Ok(assertion) => {
                let source = self.registry.intern(&assertion.author);
                let target = self.registry.intern(&assertion.target);
                let edge = Edge {
                    value: assertion.value,
                    entity_type: assertion.entity_type,
                };
                self.apply_edge(
                    source,
                    target,
                    Stamped::confirmed(edge, assertion.created_at, event_uid),
                )
            }
            Err(e) => {
                debug!(event = %event.id, "discarding trust assertion: {e}");
                Merge::Unchanged
            }
        }
    }

    /// Upsert the edge `source -> target`.
    ///
    /// Older assertions than the stored one are ignored; a tie keeps the
    /// first one seen. Self-loops are discarded.
    pub fn apply_edge(&mut self, source: Uid, target: Uid, edge: Stamped<Edge>) -> Merge {
        if source == target {
            debug!(%source, "discarding self-referential trust edge");
            return Merge::Unchanged;
        }

        let merged = crate::lww::merge_into(&mut self.edges, (source, target), edge);
        if merged == Merge::Inserted {
            self.outgoing.entry(source).or_default().insert(target);
            self.incoming.entry(target).or_default().insert(source);
        }
        if merged.changed() {
            self.generation += 1;
        }
        merged
    }

    pub fn edge(&self, source: Uid, target: Uid) -> Option<&Stamped<Edge>> {
        self.edges.get(&(source, target))
    }

    /// Every stored edge, including neutral ones.
    pub fn edges(&self) -> impl Iterator<Item = (Uid, Uid, &Stamped<Edge>)> {
        self.edges.iter().map(|((s, t), e)| (*s, *t, e))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The viewer's own edge to `uid` is `+1`.
    pub fn is_trusted(&self, uid: Uid) -> bool {
        self.viewer_value(uid) == Some(TrustValue::Trust)
    }

    /// The viewer's own edge to `uid` is `-1`.
    pub fn is_distrusted(&self, uid: Uid) -> bool {
        self.viewer_value(uid) == Some(TrustValue::Distrust)
    }

    fn viewer_value(&self, uid: Uid) -> Option<TrustValue> {
        let viewer = self.viewer?;
        self.edges.get(&(viewer, uid)).map(|e| e.value.value)
    }

    /// Minimum trust distance from `viewer` to every identity within
    /// [`MAX_DEGREE`].
    ///
    /// Only `+1` key edges are followed. Identities the viewer distrusts
    /// directly are never expanded, whatever path leads to them.
    pub fn distances(&self, viewer: Uid) -> Arc<HashMap<Uid, usize>> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(c) = cache.as_ref() {
            if c.generation == self.generation && c.viewer == viewer {
                return Arc::clone(&c.distances);
            }
        }

        let distances = Arc::new(self.walk(viewer));
        *cache = Some(DistanceCache {
            generation: self.generation,
            viewer,
            distances: Arc::clone(&distances),
        });
        distances
    }

    fn walk(&self, viewer: Uid) -> HashMap<Uid, usize> {
        let mut dist = HashMap::from([(viewer, 0)]);
        let mut frontier = vec![viewer];

        for depth in 1..=MAX_DEGREE {
            let mut next = Vec::new();
            for source in frontier {
                let Some(targets) = self.outgoing.get(&source) else {
                    continue;
                };
                for target in targets {
                    if dist.contains_key(target) || self.vetoed(viewer, *target) {
                        continue;
                    }
                    let follows = self.edges.get(&(source, *target)).is_some_and(|e| {
                        e.value.value == TrustValue::Trust && e.value.entity_type == EntityType::Key
                    });
                    if follows {
                        dist.insert(*target, depth);
                        next.push(*target);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        dist
    }

    fn vetoed(&self, viewer: Uid, uid: Uid) -> bool {
        self.edges
            .get(&(viewer, uid))
            .is_some_and(|e| e.value.value == TrustValue::Distrust)
    }

    /// Every non-neutral opinion about `target` held by an identity within
    /// [`MAX_DEGREE`] of `viewer`, each attributed to its closest degree.
    pub fn assessments(&self, target: Uid, viewer: Uid) -> Vec<Assessment> {
        let Some(assessors) = self.incoming.get(&target) else {
            return vec![];
        };
        let distances = self.distances(viewer);

        let mut out: Vec<Assessment> = assessors
            .iter()
            .filter_map(|assessor| {
                let degree = *distances.get(assessor)?;
                let edge = self.edges.get(&(*assessor, target))?;
                (edge.value.value != TrustValue::Neutral).then_some(Assessment {
                    assessor: *assessor,
                    degree,
                    value: edge.value.value,
                })
            })
            .collect();
        out.sort_by_key(|a| (a.degree, a.assessor));
        out
    }

    /// Tally the opinions about `target` as seen from `viewer`.
    pub fn score_of(&self, target: Uid, viewer: Uid) -> TrustScore {
        let mut score = TrustScore::default();
        for a in self.assessments(target, viewer) {
            match a.value {
                TrustValue::Trust => score.trusts[a.degree] += 1,
                TrustValue::Distrust => score.distrusts[a.degree] += 1,
                TrustValue::Neutral => {}
            }
        }
        score
    }
}
