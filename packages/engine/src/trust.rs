//! Trust service: the shared trust graph plus local trust publishing.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};
use trustmesh::{
    draft_assertion, EntityType, Event, GraphSnapshot, Merge, Registry, Signer, Stamped,
    TrustAssertion, TrustGraph, TrustScore, TrustValue, Uid,
};

use crate::error::PublishError;
use crate::transport::Transport;

/// Owns the process-wide [`TrustGraph`]. The viewer is the signer's
/// identity.
pub struct TrustService {
    graph: RwLock<TrustGraph>,
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn Signer>,
}

impl TrustService {
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        let mut graph = TrustGraph::new(Arc::clone(&registry));
        graph.set_viewer(registry.intern(&signer.public_key()));
        Self {
            graph: RwLock::new(graph),
            registry,
            transport,
            signer,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TrustGraph> {
        self.graph.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrustGraph> {
        self.graph.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `f` against the graph under its read lock.
    pub fn with_graph<R>(&self, f: impl FnOnce(&TrustGraph) -> R) -> R {
        f(&self.read())
    }

    pub fn ingest(&self, event: &Event, event_uid: Uid) -> Merge {
        self.write().ingest(event, event_uid)
    }

    pub fn viewer(&self) -> String {
        self.signer.public_key()
    }

    /// Whether the local identity directly trusts `id`.
    pub fn is_trusted(&self, id: &str) -> bool {
        self.registry
            .lookup(id)
            .is_some_and(|uid| self.read().is_trusted(uid))
    }

    /// Whether the local identity directly distrusts `id`.
    pub fn is_distrusted(&self, id: &str) -> bool {
        self.registry
            .lookup(id)
            .is_some_and(|uid| self.read().is_distrusted(uid))
    }

    /// Score of `target` from the local identity's point of view.
    pub fn score(&self, target: &str) -> TrustScore {
        self.score_of(target, &self.viewer())
    }

    /// Score of `target` from `viewer`'s point of view. Unknown identities
    /// score empty.
    pub fn score_of(&self, target: &str, viewer: &str) -> TrustScore {
        match (self.registry.lookup(target), self.registry.lookup(viewer)) {
            (Some(t), Some(v)) => self.read().score_of(t, v),
            _ => TrustScore::default(),
        }
    }

    /// Sign and publish an assertion by the local identity about `target`.
    ///
    /// The edge is applied locally as `LocalPending` before the network call,
    /// so queries reflect it immediately. On transport failure it stays
    /// applied and the signed event comes back inside the error.
    pub async fn publish_trust(
        &self,
        target: &str,
        value: TrustValue,
        entity_type: EntityType,
    ) -> Result<Event, PublishError> {
        let author = self.signer.public_key();
        let source = self.registry.intern(&author);
        let target_uid = self.registry.intern(target);

        let mut draft = draft_assertion(&author, target, value, entity_type);
        if let Some(previous) = self.read().edge(source, target_uid) {
            draft.created_at = draft.created_at.max(previous.created_at + 1);
        }
        let event = self.signer.sign(draft)?;
        let assertion =
            TrustAssertion::from_event(&event).map_err(|e| PublishError::Draft(e.to_string()))?;

        let edge = trustmesh::Edge {
            value: assertion.value,
            entity_type: assertion.entity_type,
        };
        let event_uid = self.registry.intern(&event.id);
        self.write().apply_edge(
            source,
            target_uid,
            Stamped::pending(edge, event.created_at, event_uid),
        );

        self.publish(event).await
    }

    pub async fn republish(&self, event: &Event) -> Result<(), PublishError> {
        self.publish(event.clone()).await.map(|_| ())
    }

    async fn publish(&self, event: Event) -> Result<Event, PublishError> {
        match self.transport.publish(&event).await {
            Ok(()) => {
                info!(id = %event.id, "published trust assertion");
                Ok(event)
            }
            Err(source) => {
                warn!(id = %event.id, error = %source, "trust assertion publish failed");
                Err(PublishError::Transport {
                    event: Box::new(event),
                    source,
                })
            }
        }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.read().snapshot()
    }

    pub fn restore(&self, snapshot: &GraphSnapshot) -> usize {
        self.write().restore(snapshot)
    }
}
