//! The engine façade.
//!
//! [`Engine::start`] wires the registry, event store, coordinator, trust
//! service and reaction indices together and spawns the ingest loop that
//! drains events from live queries and feed pages. Everything the engine
//! owns is torn down by [`Engine::dispose`].

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use trustmesh::{
    kinds, validate_event, EntryRecord, Event, EventStore, Filter, GraphSnapshot, Registry,
    Signer, SnapshotError, Uid, SNAPSHOT_VERSION,
};

use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::error::StoreError;
use crate::feed::FeedCursor;
use crate::reactions::{
    Likes, ReactionIndex, ReactionKind, Replies, Reposts, Services, Vote, Zaps,
};
use crate::snapshot::SnapshotStore;
use crate::trust::TrustService;
use crate::transport::Transport;

/// Key under which [`Engine::persist`] saves its snapshot.
pub const SNAPSHOT_KEY: &str = "engine";

#[derive(Serialize, Deserialize)]
struct EngineSnapshot {
    version: u32,
    graph: GraphSnapshot,
    likes: Vec<EntryRecord<Vote>>,
    reposts: Vec<EntryRecord<()>>,
    replies: Vec<EntryRecord<()>>,
    zaps: Vec<EntryRecord<u64>>,
}

#[derive(Deserialize)]
struct SnapshotHeader {
    version: u32,
}

pub struct Engine {
    config: EngineConfig,
    services: Services,
    trust: TrustService,
    likes: ReactionIndex<Likes>,
    reposts: ReactionIndex<Reposts>,
    replies: ReactionIndex<Replies>,
    zaps: ReactionIndex<Zaps>,
    ingest_tx: mpsc::UnboundedSender<Event>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine and start its ingest loop. Must be called inside a
    /// tokio runtime.
    pub fn start(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn Signer>,
    ) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(EventStore::new(Arc::clone(&registry)));
        let (ingest_tx, mut ingest_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(
            Arc::clone(&transport),
            ingest_tx.clone(),
            config.live_capacity,
        );
        let services = Services {
            registry: Arc::clone(&registry),
            store,
            coordinator,
            transport: Arc::clone(&transport),
            signer: Arc::clone(&signer),
        };

        let engine = Arc::new(Self {
            trust: TrustService::new(registry, transport, signer),
            likes: ReactionIndex::new(services.clone(), &config),
            reposts: ReactionIndex::new(services.clone(), &config),
            replies: ReactionIndex::new(services.clone(), &config),
            zaps: ReactionIndex::new(services.clone(), &config),
            services,
            config,
            ingest_tx,
            pump: Mutex::new(None),
        });

        let weak = Arc::downgrade(&engine);
        let pump = tokio::spawn(async move {
            while let Some(event) = ingest_rx.recv().await {
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                engine.ingest(event);
            }
            debug!("ingest loop stopped");
        });
        *engine.pump.lock().unwrap_or_else(|p| p.into_inner()) = Some(pump);

        info!(viewer = %engine.trust.viewer(), "engine started");
        engine
    }

    /// Stop the ingest loop and close every live query. Indices keep their
    /// contents and stay readable. Calling this twice is harmless.
    pub fn dispose(&self) {
        let pump = self.pump.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(pump) = pump {
            pump.abort();
            self.services.coordinator.shutdown();
            info!("engine disposed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.pump
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|p| !p.is_finished())
    }

    /// Validate, store and index one event. Returns its uid, or `None` if
    /// the event was dropped as invalid.
    ///
    /// Re-deliveries are indexed again so an echo of a local event confirms
    /// it; merges make this a no-op otherwise.
    pub fn ingest(&self, event: Event) -> Option<Uid> {
        if let Err(e) = validate_event(&event) {
            debug!(id = %event.id, "dropping invalid event: {e}");
            return None;
        }
        let inserted = self.services.store.insert(event.clone());
        let uid = inserted.uid();
        self.route(&event, uid);

        if inserted.is_new() {
            self.reposts.resolve(uid);
            self.replies.resolve(uid);
        }
        Some(uid)
    }

    fn route(&self, event: &Event, uid: Uid) {
        match event.kind {
            kinds::TRUST_ASSERTION => {
                self.trust.ingest(event, uid);
            }
            k if Likes::KINDS.contains(&k) => {
                self.likes.ingest(event, uid);
            }
            k if Reposts::KINDS.contains(&k) => {
                self.reposts.ingest(event, uid);
            }
            k if Replies::KINDS.contains(&k) => {
                self.replies.ingest(event, uid);
            }
            k if Zaps::KINDS.contains(&k) => {
                self.zaps.ingest(event, uid);
            }
            other => trace!(kind = other, "no index for event kind"),
        }
    }

    /// Queue an event for the ingest loop, as a live query would.
    pub fn enqueue(&self, event: Event) {
        let _ = self.ingest_tx.send(event);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.services.registry
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.services.store
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.services.coordinator
    }

    pub fn trust(&self) -> &TrustService {
        &self.trust
    }

    pub fn likes(&self) -> &ReactionIndex<Likes> {
        &self.likes
    }

    pub fn reposts(&self) -> &ReactionIndex<Reposts> {
        &self.reposts
    }

    pub fn replies(&self) -> &ReactionIndex<Replies> {
        &self.replies
    }

    pub fn zaps(&self) -> &ReactionIndex<Zaps> {
        &self.zaps
    }

    /// A paginated feed over events matching `filter`. Fetched events are
    /// indexed as they arrive.
    pub fn feed(&self, filter: Filter) -> FeedCursor {
        FeedCursor::new(
            Arc::clone(&self.services.transport),
            self.services.coordinator.clone(),
            self.ingest_tx.clone(),
            filter,
            self.config.feed_page,
        )
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// The trust graph and every reaction index as one JSON document.
    pub fn serialize(&self) -> Result<Vec<u8>, SnapshotError> {
        let snapshot = EngineSnapshot {
            version: SNAPSHOT_VERSION,
            graph: self.trust.snapshot(),
            likes: self.likes.snapshot(),
            reposts: self.reposts.snapshot(),
            replies: self.replies.snapshot(),
            zaps: self.zaps.snapshot(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Merge a document produced by [`serialize`](Self::serialize). Returns
    /// how many edges and entries changed.
    pub fn restore(&self, bytes: &[u8]) -> Result<usize, SnapshotError> {
        let header: SnapshotHeader = serde_json::from_slice(bytes)?;
        if header.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: header.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        let snapshot: EngineSnapshot = serde_json::from_slice(bytes)?;

        let changed = self.trust.restore(&snapshot.graph)
            + self.likes.restore(&snapshot.likes)
            + self.reposts.restore(&snapshot.reposts)
            + self.replies.restore(&snapshot.replies)
            + self.zaps.restore(&snapshot.zaps);
        info!(changed, "restored engine snapshot");
        Ok(changed)
    }

    pub async fn persist(&self, store: &dyn SnapshotStore) -> Result<(), StoreError> {
        let blob = self.serialize()?;
        store.save(SNAPSHOT_KEY, &blob).await
    }

    /// Restore from `store`. Returns `false` when nothing was saved yet.
    pub async fn load(&self, store: &dyn SnapshotStore) -> Result<bool, StoreError> {
        match store.load(SNAPSHOT_KEY).await? {
            Some(blob) => {
                self.restore(&blob)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::memory::MemorySnapshotStore;
    use crate::transport::memory::MemoryRelay;
    use std::time::Duration;
    use trustmesh::{draft_assertion, EntityType, Keypair, TrustValue, UnsignedEvent};

    fn start() -> (Arc<MemoryRelay>, Arc<Engine>) {
        let relay = Arc::new(MemoryRelay::new());
        let config = EngineConfig {
            throttle: Duration::ZERO,
            ..EngineConfig::default()
        };
        let engine = Engine::start(config, relay.clone(), Arc::new(Keypair::generate()));
        (relay, engine)
    }

    fn trust(from: &Keypair, to: &str, value: TrustValue) -> Event {
        from.sign(draft_assertion("", to, value, EntityType::Key))
            .unwrap()
    }

    #[tokio::test]
    async fn routes_events_by_kind() {
        let (_relay, engine) = start();
        let alice = Keypair::generate();
        let note = alice
            .sign(UnsignedEvent::new(kinds::TEXT_NOTE, "hello", ""))
            .unwrap();
        let like = alice
            .sign(UnsignedEvent::new(kinds::REACTION, "+", "").tag(["e", note.id.as_str()]))
            .unwrap();

        engine.ingest(note.clone()).unwrap();
        engine.ingest(like).unwrap();
        engine
            .ingest(trust(&alice, &engine.trust().viewer(), TrustValue::Trust))
            .unwrap();

        assert_eq!(engine.likes().get(&note.id).len(), 1);
        assert_eq!(engine.trust().score_of(&engine.trust().viewer(), &alice.public_key()).trusts, [1, 0, 0]);
    }

    #[tokio::test]
    async fn invalid_events_are_dropped() {
        let (_relay, engine) = start();
        let mut bad = Keypair::generate()
            .sign(UnsignedEvent::new(kinds::REACTION, "+", "").tag(["e", "t"]))
            .unwrap();
        bad.id = "not-hex".into();
        assert!(engine.ingest(bad).is_none());
        assert!(engine.store().is_empty());
        assert!(engine.likes().get("t").is_empty());
    }

    #[tokio::test]
    async fn live_events_flow_through_the_ingest_loop() {
        let (relay, engine) = start();
        let target = "ab".repeat(32);
        let mut listener = engine.likes().add_listener(&target);

        let like = Keypair::generate()
            .sign(UnsignedEvent::new(kinds::REACTION, "+", "").tag(["e", target.as_str()]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        relay.push(like);

        let n = listener.recv().await.unwrap();
        assert_eq!(n.aggregate.len(), 1);
    }

    #[tokio::test]
    async fn dispose_closes_live_queries() {
        let (relay, engine) = start();
        let _handle = engine
            .coordinator()
            .open_ready(Likes::filter_for("t"))
            .await
            .unwrap();
        assert_eq!(relay.live_queries(), 1);

        engine.dispose();
        engine.dispose();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!engine.is_running());
        assert_eq!(relay.live_queries(), 0);
        assert_eq!(engine.coordinator().active_queries(), 0);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_a_store() {
        let (_relay, engine) = start();
        let alice = Keypair::generate();
        let bob = Keypair::generate().public_key();
        engine.ingest(trust(&alice, &bob, TrustValue::Distrust)).unwrap();
        engine.likes().submit("cd".repeat(32).as_str(), Vote::Like).await.unwrap();

        let store = MemorySnapshotStore::new();
        engine.persist(&store).await.unwrap();

        let (_relay2, fresh) = start();
        assert!(fresh.load(&store).await.unwrap());
        assert_eq!(fresh.trust().snapshot().edges, engine.trust().snapshot().edges);
        assert_eq!(fresh.likes().snapshot(), engine.likes().snapshot());
        // Loading again changes nothing.
        assert_eq!(fresh.restore(&engine.serialize().unwrap()).unwrap(), 0);
    }

    #[tokio::test]
    async fn replies_to_a_restored_target_are_indexed() {
        let (_relay, engine) = start();
        let root = Keypair::generate()
            .sign(UnsignedEvent::new(kinds::TEXT_NOTE, "root", "").at(100))
            .unwrap();
        let reply = |text: &str, at: u64| {
            Keypair::generate()
                .sign(Replies::draft(&root.id, text.to_string(), "").at(at))
                .unwrap()
        };
        engine.ingest(root.clone()).unwrap();
        engine.ingest(reply("first", 101)).unwrap();

        let (_relay2, fresh) = start();
        fresh.restore(&engine.serialize().unwrap()).unwrap();
        fresh.ingest(reply("second", 102)).unwrap();

        assert_eq!(fresh.replies().get(&root.id).len(), 2);
        assert_eq!(fresh.replies().pending_len(), 0);
    }

    #[tokio::test]
    async fn unknown_snapshot_version_is_refused() {
        let (_relay, engine) = start();
        let err = engine.restore(br#"{"version": 99}"#).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::UnsupportedVersion { found: 99, .. }
        ));
        assert!(!engine.load(&MemorySnapshotStore::new()).await.unwrap());
    }
}
