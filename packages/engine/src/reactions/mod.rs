//! Reaction indices.
//!
//! A [`ReactionIndex`] keeps, per target event, one last-write-wins entry per
//! key and folds them into an aggregate on demand. The four kinds differ only
//! in how an event is parsed, what makes an entry unique, and how entries are
//! aggregated; that is what [`ReactionKind`] captures.
//!
//! | Kind | Event kinds | Key | Aggregate |
//! |------|-------------|-----|-----------|
//! | [`Likes`] | 7 | reactor | reactors with a standing like |
//! | [`Reposts`] | 6, 16 | reposter | reposters |
//! | [`Replies`] | 1 | reply event | reply events |
//! | [`Zaps`] | 9735 | zap request | msat total, zap count, zappers |
//!
//! Listeners are registered per target. The first listener for a target opens
//! a relay subscription through the [`Coordinator`], the last one to go closes
//! it. Notifications are throttled per target with a leading and a trailing
//! delivery.

pub mod likes;
pub mod replies;
pub mod reposts;
pub mod zaps;

pub use likes::{Likes, Vote};
pub use replies::Replies;
pub use reposts::Reposts;
pub use zaps::{ZapDraft, ZapTotals, Zaps};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use trustmesh::lww::merge_into;
use trustmesh::{
    EntryRecord, Event, EventStore, Filter, Merge, Provenance, Registry, Signer, Stamped, Uid,
    UnsignedEvent,
};

use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, QueryState, SubscriptionHandle};
use crate::error::{PublishError, SubscribeError};
use crate::throttle::{Fire, Throttle};
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// ReactionKind
// ---------------------------------------------------------------------------

/// A reaction extracted from an event, still in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction<V> {
    pub target: String,
    pub key: String,
    pub actor: String,
    pub value: V,
}

/// Who contributed an entry, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution<V> {
    pub actor: Uid,
    pub value: V,
}

/// All entries for one target, by key.
pub type Entries<V> = HashMap<Uid, Stamped<Contribution<V>>>;

pub trait ReactionKind: Send + Sync + 'static {
    /// Used in logs.
    const NAME: &'static str;

    /// Event kinds routed to this index and requested from relays.
    const KINDS: &'static [u32];

    /// Hold reactions back until the target event itself has been ingested.
    const AWAITS_TARGET: bool;

    type Value: Clone
        + PartialEq
        + fmt::Debug
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static;
    type Draft: Send;
    type Aggregate: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static;

    fn parse(event: &Event) -> Option<Reaction<Self::Value>>;

    fn draft(target: &str, draft: Self::Draft, author: &str) -> UnsignedEvent;

    fn aggregate(entries: &Entries<Self::Value>) -> Self::Aggregate;

    /// The relay filter for reactions to `target`.
    fn filter_for(target: &str) -> Filter {
        Filter::new()
            .kinds(Self::KINDS.iter().copied())
            .event_refs([target])
    }
}

/// Sent to listeners when the aggregate for their target changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification<A> {
    pub target: String,
    pub aggregate: A,
}

/// What [`ReactionIndex::ingest`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not a reaction this index understands.
    Ignored,
    /// Held until the target event arrives.
    Buffered,
    Merged(Merge),
}

/// The engine-wide services every index needs.
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<Registry>,
    pub store: Arc<EventStore>,
    pub coordinator: Coordinator,
    pub transport: Arc<dyn Transport>,
    pub signer: Arc<dyn Signer>,
}

// ---------------------------------------------------------------------------
// ReactionIndex
// ---------------------------------------------------------------------------

pub struct ReactionIndex<K: ReactionKind> {
    shared: Arc<Shared<K>>,
}

impl<K: ReactionKind> Clone for ReactionIndex<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<K: ReactionKind> {
    services: Services,
    throttle: Duration,
    max_pending_per_target: usize,
    max_pending_targets: usize,
    state: RwLock<State<K>>,
    next_listener: AtomicU64,
}

struct State<K: ReactionKind> {
    targets: HashMap<Uid, Entries<K::Value>>,
    pending: HashMap<Uid, Vec<Event>>,
    pending_order: VecDeque<Uid>,
    observers: HashMap<Uid, Observers<K::Aggregate>>,
}

struct Observers<A> {
    target_id: String,
    /// Distinguishes this registration from a later one for the same target,
    /// so a stale trailing timer does nothing.
    epoch: u64,
    listeners: HashMap<u64, mpsc::UnboundedSender<Notification<A>>>,
    throttle: Throttle,
    subscription: SubscriptionHandle,
}

impl<A: Clone> Observers<A> {
    fn deliver(&mut self, aggregate: A) {
        self.listeners.retain(|_, tx| {
            tx.send(Notification {
                target: self.target_id.clone(),
                aggregate: aggregate.clone(),
            })
            .is_ok()
        });
    }
}

impl<K: ReactionKind> ReactionIndex<K> {
    pub fn new(services: Services, config: &EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                services,
                throttle: config.throttle,
                max_pending_per_target: config.max_pending_per_target,
                max_pending_targets: config.max_pending_targets,
                state: RwLock::new(State {
                    targets: HashMap::new(),
                    pending: HashMap::new(),
                    pending_order: VecDeque::new(),
                    observers: HashMap::new(),
                }),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Current aggregate for `target`. Unknown targets yield the empty
    /// aggregate.
    pub fn get(&self, target: &str) -> K::Aggregate {
        let Some(uid) = self.shared.services.registry.lookup(target) else {
            return K::Aggregate::default();
        };
        let state = self.shared.read();
        aggregate_of::<K>(&state.targets, uid)
    }

    /// The entry stored for `key` on `target`.
    pub fn entry(&self, target: &str, key: &str) -> Option<Stamped<Contribution<K::Value>>> {
        let registry = &self.shared.services.registry;
        let (t, k) = (registry.lookup(target)?, registry.lookup(key)?);
        self.shared.read().targets.get(&t)?.get(&k).cloned()
    }

    /// Register for change notifications on `target`. Drop the listener to
    /// unregister.
    pub fn add_listener(&self, target: &str) -> Listener<K> {
        let shared = &self.shared;
        let uid = shared.services.registry.intern(target);
        let id = shared.next_listener.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        shared
            .write()
            .observers
            .entry(uid)
            .or_insert_with(|| {
                debug!(index = K::NAME, target_id = target, "first listener, subscribing");
                Observers {
                    target_id: target.to_string(),
                    epoch: id,
                    listeners: HashMap::new(),
                    throttle: Throttle::new(shared.throttle),
                    subscription: shared.services.coordinator.open(K::filter_for(target)),
                }
            })
            .listeners
            .insert(id, tx);
        shared.ensure_subscribed(uid);

        Listener {
            id,
            target: uid,
            target_id: target.to_string(),
            rx,
            index: Arc::downgrade(shared),
        }
    }

    pub fn remove_listener(&self, listener: Listener<K>) {
        drop(listener);
    }

    pub fn listener_count(&self, target: &str) -> usize {
        let Some(uid) = self.shared.services.registry.lookup(target) else {
            return 0;
        };
        self.shared
            .read()
            .observers
            .get(&uid)
            .map_or(0, |o| o.listeners.len())
    }

    /// A relay subscription for reactions to `target` that does not notify
    /// anyone; events still flow into this index through the engine.
    pub fn subscribe_relays(&self, target: &str) -> SubscriptionHandle {
        self.shared.services.coordinator.open(K::filter_for(target))
    }

    /// Fold a network event into the index. The event must already be in
    /// the event store under `event_uid`.
    pub fn ingest(&self, event: &Event, event_uid: Uid) -> Outcome {
        let Some(reaction) = K::parse(event) else {
            trace!(index = K::NAME, id = %event.id, "not a reaction for this index");
            return Outcome::Ignored;
        };
        let target = self.shared.services.registry.intern(&reaction.target);
        if K::AWAITS_TARGET && !self.shared.target_known(target) {
            self.shared.buffer(target, event.clone());
            return Outcome::Buffered;
        }
        Outcome::Merged(self.shared.apply(
            target,
            reaction,
            event.created_at,
            event_uid,
            Provenance::Confirmed,
        ))
    }

    /// Replay reactions that were waiting for `target`. Returns how many of
    /// them changed the index.
    pub fn resolve(&self, target: Uid) -> usize {
        if !K::AWAITS_TARGET {
            return 0;
        }
        let waiting = {
            let mut state = self.shared.write();
            let waiting = state.pending.remove(&target);
            if waiting.is_some() {
                state.pending_order.retain(|t| *t != target);
            }
            waiting
        };
        let Some(waiting) = waiting else {
            return 0;
        };

        let registry = &self.shared.services.registry;
        let applied = waiting
            .iter()
            .filter(|e| {
                matches!(
                    self.ingest(e, registry.intern(&e.id)),
                    Outcome::Merged(m) if m.changed()
                )
            })
            .count();
        debug!(index = K::NAME, target_uid = %target, waiting = waiting.len(), applied, "resolved pending reactions");
        applied
    }

    /// Reactions currently held for unknown targets.
    pub fn pending_len(&self) -> usize {
        self.shared.read().pending.values().map(Vec::len).sum()
    }

    /// Sign, apply locally and publish a reaction by the local identity.
    ///
    /// Returns `Ok(None)` without publishing when an identical reaction by
    /// us is already in place. On a transport failure the local entry stays
    /// as `LocalPending` and the signed event is returned inside the error.
    pub async fn submit(&self, target: &str, draft: K::Draft) -> Result<Option<Event>, PublishError> {
        let shared = &self.shared;
        let services = &shared.services;
        let author = services.signer.public_key();
        let target_uid = services.registry.intern(target);
        let actor = services.registry.intern(&author);

        let mut unsigned = K::draft(target, draft, &author);
        // Our own reactions must be strictly ordered, or a quick change of
        // mind within one second would tie and be dropped.
        if let Some(latest) = shared.latest_by(target_uid, actor) {
            unsigned.created_at = unsigned.created_at.max(latest + 1);
        }

        let event = services.signer.sign(unsigned)?;
        let reaction = K::parse(&event)
            .ok_or_else(|| PublishError::Draft(format!("{} draft does not parse", K::NAME)))?;

        let key = services.registry.intern(&reaction.key);
        if shared.holds(target_uid, key, actor, &reaction.value) {
            debug!(index = K::NAME, target_id = target, "reaction already in place");
            return Ok(None);
        }

        let event_uid = services.store.insert(event.clone()).uid();
        shared.apply(
            target_uid,
            reaction,
            event.created_at,
            event_uid,
            Provenance::LocalPending,
        );
        self.publish(event).await.map(Some)
    }

    /// Retry publishing an event returned by a failed [`submit`](Self::submit).
    pub async fn republish(&self, event: &Event) -> Result<(), PublishError> {
        self.publish(event.clone()).await.map(|_| ())
    }

    async fn publish(&self, event: Event) -> Result<Event, PublishError> {
        match self.shared.services.transport.publish(&event).await {
            Ok(()) => {
                info!(index = K::NAME, id = %event.id, "published reaction");
                Ok(event)
            }
            Err(source) => {
                warn!(index = K::NAME, id = %event.id, error = %source, "publish failed");
                Err(PublishError::Transport {
                    event: Box::new(event),
                    source,
                })
            }
        }
    }

    pub fn snapshot(&self) -> Vec<EntryRecord<K::Value>> {
        let registry = &self.shared.services.registry;
        let state = self.shared.read();
        let mut records: Vec<EntryRecord<K::Value>> = state
            .targets
            .iter()
            .flat_map(|(t, entries)| entries.iter().map(move |(k, e)| (*t, *k, e)))
            .filter_map(|(t, k, e)| {
                Some(EntryRecord {
                    target: registry.resolve(t)?,
                    key: registry.resolve(k)?,
                    actor: registry.resolve(e.value.actor)?,
                    value: e.value.value.clone(),
                    created_at: e.created_at,
                    event: registry.resolve(e.event)?,
                    provenance: e.provenance,
                })
            })
            .collect();
        records.sort_by(|a, b| (&a.target, &a.key).cmp(&(&b.target, &b.key)));
        records
    }

    /// Merge snapshot records. Returns how many entries changed.
    ///
    /// Reactions that were waiting for a target the snapshot already knows
    /// about are replayed afterwards.
    pub fn restore(&self, records: &[EntryRecord<K::Value>]) -> usize {
        let registry = &self.shared.services.registry;
        let changed = records
            .iter()
            .filter(|r| {
                let reaction = Reaction {
                    target: r.target.clone(),
                    key: r.key.clone(),
                    actor: r.actor.clone(),
                    value: r.value.clone(),
                };
                self.shared
                    .apply(
                        registry.intern(&r.target),
                        reaction,
                        r.created_at,
                        registry.intern(&r.event),
                        r.provenance,
                    )
                    .changed()
            })
            .count();

        let waiting: Vec<Uid> = {
            let state = self.shared.read();
            state
                .pending
                .keys()
                .filter(|t| state.targets.contains_key(t))
                .copied()
                .collect()
        };
        for target in waiting {
            self.resolve(target);
        }
        changed
    }
}

impl<K: ReactionKind> Shared<K> {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, State<K>> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State<K>> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    fn apply(
        self: &Arc<Self>,
        target: Uid,
        reaction: Reaction<K::Value>,
        created_at: u64,
        event: Uid,
        provenance: Provenance,
    ) -> Merge {
        let registry = &self.services.registry;
        let stamped = Stamped {
            value: Contribution {
                actor: registry.intern(&reaction.actor),
                value: reaction.value,
            },
            created_at,
            event,
            provenance,
        };
        let key = registry.intern(&reaction.key);

        let mut state = self.write();
        let merge = merge_into(state.targets.entry(target).or_default(), key, stamped);
        if merge.changed() {
            self.notify(&mut state, target);
        }
        merge
    }

    /// Deliver or schedule a notification for `target`. Called with the
    /// state lock held so the aggregate matches the change just made.
    fn notify(self: &Arc<Self>, state: &mut State<K>, target: Uid) {
        let State {
            targets, observers, ..
        } = state;
        let Some(obs) = observers.get_mut(&target) else {
            return;
        };
        match obs.throttle.hit(Instant::now()) {
            Fire::Now => obs.deliver(aggregate_of::<K>(targets, target)),
            Fire::At(when) => {
                let weak = Arc::downgrade(self);
                let epoch = obs.epoch;
                tokio::spawn(async move {
                    tokio::time::sleep_until(when).await;
                    if let Some(shared) = weak.upgrade() {
                        shared.fire_trailing(target, epoch);
                    }
                });
            }
            Fire::Coalesced => {}
        }
    }

    fn fire_trailing(&self, target: Uid, epoch: u64) {
        let mut guard = self.write();
        let State {
            targets, observers, ..
        } = &mut *guard;
        let Some(obs) = observers.get_mut(&target) else {
            return;
        };
        if obs.epoch != epoch {
            return;
        }
        obs.throttle.fire_trailing(Instant::now());
        obs.deliver(aggregate_of::<K>(targets, target));
    }

    fn buffer(&self, target: Uid, event: Event) {
        if self.max_pending_targets == 0 || self.max_pending_per_target == 0 {
            return;
        }
        let mut state = self.write();
        if !state.pending.contains_key(&target) {
            while state.pending.len() >= self.max_pending_targets {
                let Some(oldest) = state.pending_order.pop_front() else {
                    break;
                };
                if let Some(dropped) = state.pending.remove(&oldest) {
                    debug!(index = K::NAME, dropped = dropped.len(), "pending buffer full, dropped oldest target");
                }
            }
            state.pending_order.push_back(target);
        }

        let queue = state.pending.entry(target).or_default();
        if queue.iter().any(|e| e.id == event.id) {
            return;
        }
        if queue.len() >= self.max_pending_per_target {
            debug!(index = K::NAME, id = %event.id, "pending queue full, dropping reaction");
            return;
        }
        queue.push(event);
    }

    fn detach(&self, target: Uid, id: u64) {
        let removed = {
            let mut state = self.write();
            let Some(obs) = state.observers.get_mut(&target) else {
                return;
            };
            obs.listeners.remove(&id);
            if !obs.listeners.is_empty() {
                return;
            }
            state.observers.remove(&target)
        };
        if let Some(obs) = removed {
            debug!(index = K::NAME, target_id = %obs.target_id, "last listener gone, unsubscribing");
        }
    }

    /// Whether reactions to `target` can be applied: its event is stored, or
    /// entries for it were restored from a snapshot.
    fn target_known(&self, target: Uid) -> bool {
        self.services.store.contains(target)
            || self
                .read()
                .targets
                .get(&target)
                .is_some_and(|entries| !entries.is_empty())
    }

    /// Reopen the relay query for `target` if it failed or ended while
    /// listeners remain.
    fn ensure_subscribed(&self, target: Uid) {
        let stale = {
            let mut state = self.write();
            let Some(obs) = state.observers.get_mut(&target) else {
                return;
            };
            if !matches!(
                obs.subscription.state(),
                QueryState::Failed(_) | QueryState::Ended
            ) {
                return;
            }
            debug!(index = K::NAME, target_id = %obs.target_id, "live query gone, resubscribing");
            let fresh = self.services.coordinator.open(K::filter_for(&obs.target_id));
            std::mem::replace(&mut obs.subscription, fresh)
        };
        drop(stale);
    }

    fn subscription_state(&self, target: Uid) -> QueryState {
        self.read()
            .observers
            .get(&target)
            .map_or(QueryState::Ended, |o| o.subscription.state())
    }

    fn latest_by(&self, target: Uid, actor: Uid) -> Option<u64> {
        self.read()
            .targets
            .get(&target)?
            .values()
            .filter(|e| e.value.actor == actor)
            .map(|e| e.created_at)
            .max()
    }

    fn holds(&self, target: Uid, key: Uid, actor: Uid, value: &K::Value) -> bool {
        self.read()
            .targets
            .get(&target)
            .and_then(|entries| entries.get(&key))
            .is_some_and(|e| e.value.actor == actor && e.value.value == *value)
    }
}

fn aggregate_of<K: ReactionKind>(targets: &HashMap<Uid, Entries<K::Value>>, target: Uid) -> K::Aggregate {
    targets.get(&target).map(K::aggregate).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Receives [`Notification`]s for one target. Unregisters on drop.
pub struct Listener<K: ReactionKind> {
    id: u64,
    target: Uid,
    target_id: String,
    rx: mpsc::UnboundedReceiver<Notification<K::Aggregate>>,
    index: Weak<Shared<K>>,
}

impl<K: ReactionKind> Listener<K> {
    pub fn target(&self) -> &str {
        &self.target_id
    }

    pub async fn recv(&mut self) -> Option<Notification<K::Aggregate>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification<K::Aggregate>> {
        self.rx.try_recv().ok()
    }

    /// State of the relay query feeding this target.
    pub fn state(&self) -> QueryState {
        self.index
            .upgrade()
            .map_or(QueryState::Ended, |shared| shared.subscription_state(self.target))
    }

    /// Wait until the relay query for this target is live.
    ///
    /// A query that failed or ended is reopened first, so calling this again
    /// after an error retries the subscription.
    pub async fn ready(&self) -> Result<(), SubscribeError> {
        let mut handle = {
            let Some(shared) = self.index.upgrade() else {
                return Err(SubscribeError::Ended);
            };
            shared.ensure_subscribed(self.target);
            shared.services.coordinator.open(K::filter_for(&self.target_id))
        };
        handle.ready().await
    }
}

impl<K: ReactionKind> Drop for Listener<K> {
    fn drop(&mut self) {
        if let Some(shared) = self.index.upgrade() {
            shared.detach(self.target, self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::memory::MemoryRelay;
    use std::collections::HashSet;
    use trustmesh::{kinds, Keypair};

    pub(crate) struct Harness {
        pub relay: Arc<MemoryRelay>,
        pub services: Services,
        pub me: Keypair,
        pub _ingest: mpsc::UnboundedReceiver<Event>,
    }

    pub(crate) fn harness() -> Harness {
        let relay = Arc::new(MemoryRelay::new());
        let registry = Arc::new(Registry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let me = Keypair::generate();
        let services = Services {
            store: Arc::new(EventStore::new(Arc::clone(&registry))),
            registry,
            coordinator: Coordinator::new(relay.clone(), tx, 64),
            transport: relay.clone(),
            signer: Arc::new(me.clone()),
        };
        Harness {
            relay,
            services,
            me,
            _ingest: rx,
        }
    }

    fn config(throttle_ms: u64) -> EngineConfig {
        EngineConfig {
            throttle: Duration::from_millis(throttle_ms),
            max_pending_per_target: 2,
            max_pending_targets: 2,
            ..EngineConfig::default()
        }
    }

    fn signed(keys: &Keypair, draft: UnsignedEvent) -> Event {
        keys.sign(draft).unwrap()
    }

    fn ingest<K: ReactionKind>(h: &Harness, index: &ReactionIndex<K>, event: &Event) -> Outcome {
        let uid = h.services.store.insert(event.clone()).uid();
        index.ingest(event, uid)
    }

    fn like(keys: &Keypair, target: &str, content: &str, at: u64) -> Event {
        signed(keys, UnsignedEvent::new(kinds::REACTION, content, "").tag(["e", target]).at(at))
    }

    #[tokio::test]
    async fn later_reaction_replaces_earlier_and_ties_keep_first() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(0));
        let alice = Keypair::generate();

        ingest(&h, &likes, &like(&alice, "t", "+", 10));
        assert_eq!(likes.get("t").len(), 1);

        // Older retraction arrives late: ignored.
        ingest(&h, &likes, &like(&alice, "t", "-", 5));
        assert_eq!(likes.get("t").len(), 1);

        // Same-second retraction: tie keeps the first.
        ingest(&h, &likes, &like(&alice, "t", "-", 10));
        assert_eq!(likes.get("t").len(), 1);

        ingest(&h, &likes, &like(&alice, "t", "-", 11));
        assert!(likes.get("t").is_empty());
    }

    #[tokio::test]
    async fn listeners_share_one_subscription() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(0));
        let filter = Likes::filter_for("t");

        let a = likes.add_listener("t");
        let b = likes.add_listener("t");
        assert_eq!(likes.listener_count("t"), 2);
        assert_eq!(h.services.coordinator.ref_count(&filter), 1);

        drop(a);
        assert_eq!(h.services.coordinator.ref_count(&filter), 1);
        likes.remove_listener(b);
        assert_eq!(h.services.coordinator.ref_count(&filter), 0);
        assert_eq!(likes.listener_count("t"), 0);
    }

    #[tokio::test]
    async fn listener_is_notified_with_current_aggregate() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(0));
        let mut listener = likes.add_listener("t");

        let alice = Keypair::generate();
        ingest(&h, &likes, &like(&alice, "t", "+", 10));

        let n = listener.recv().await.unwrap();
        assert_eq!(n.target, "t");
        let alice_uid = h.services.registry.lookup(&alice.public_key()).unwrap();
        assert_eq!(n.aggregate, HashSet::from([alice_uid]));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_coalesced_into_leading_and_trailing() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(1000));
        let mut listener = likes.add_listener("t");

        for i in 0..20 {
            ingest(&h, &likes, &like(&Keypair::generate(), "t", "+", 100 + i));
            tokio::time::advance(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut seen = Vec::new();
        while let Some(n) = listener.try_recv() {
            seen.push(n.aggregate.len());
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], 1);
        assert_eq!(seen[1], 20);
    }

    #[tokio::test]
    async fn failed_subscription_is_reported_and_reopened() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(0));
        let filter = Likes::filter_for("t");
        h.relay.fail_queries(true);

        let first = likes.add_listener("t");
        assert!(matches!(first.ready().await, Err(SubscribeError::Failed(_))));
        assert!(matches!(first.state(), QueryState::Failed(_)));
        assert_eq!(h.services.coordinator.active_queries(), 0);

        // A second listener on the same target brings the query back.
        h.relay.fail_queries(false);
        let second = likes.add_listener("t");
        second.ready().await.unwrap();
        assert_eq!(first.state(), QueryState::Live);
        assert_eq!(h.services.coordinator.ref_count(&filter), 1);
        assert_eq!(h.relay.queries_opened(), 1);
    }

    #[tokio::test]
    async fn restored_target_accepts_new_replies() {
        let h = harness();
        let replies = ReactionIndex::<Replies>::new(h.services.clone(), &config(0));
        let root = signed(&Keypair::generate(), UnsignedEvent::new(kinds::TEXT_NOTE, "root", "").at(1));
        h.services.store.insert(root.clone());
        let first = signed(&Keypair::generate(), Replies::draft(&root.id, "a".into(), "").at(2));
        ingest(&h, &replies, &first);

        // A fresh index and store that only know the target from a snapshot.
        let fresh = harness();
        let restored = ReactionIndex::<Replies>::new(fresh.services.clone(), &config(0));
        restored.restore(&replies.snapshot());

        let second = signed(&Keypair::generate(), Replies::draft(&root.id, "b".into(), "").at(3));
        let uid = fresh.services.store.insert(second.clone()).uid();
        assert!(matches!(restored.ingest(&second, uid), Outcome::Merged(Merge::Inserted)));
        assert_eq!(restored.get(&root.id).len(), 2);
        assert_eq!(restored.pending_len(), 0);
    }

    #[tokio::test]
    async fn restore_releases_replies_waiting_for_a_known_target() {
        let h = harness();
        let replies = ReactionIndex::<Replies>::new(h.services.clone(), &config(0));
        let root = signed(&Keypair::generate(), UnsignedEvent::new(kinds::TEXT_NOTE, "root", "").at(1));
        h.services.store.insert(root.clone());
        let first = signed(&Keypair::generate(), Replies::draft(&root.id, "a".into(), "").at(2));
        ingest(&h, &replies, &first);

        let fresh = harness();
        let restored = ReactionIndex::<Replies>::new(fresh.services.clone(), &config(0));
        let early = signed(&Keypair::generate(), Replies::draft(&root.id, "b".into(), "").at(3));
        assert_eq!(ingest(&fresh, &restored, &early), Outcome::Buffered);

        restored.restore(&replies.snapshot());
        assert_eq!(restored.pending_len(), 0);
        assert_eq!(restored.get(&root.id).len(), 2);
    }

    #[tokio::test]
    async fn reply_waits_for_its_target() {
        let h = harness();
        let replies = ReactionIndex::<Replies>::new(h.services.clone(), &config(0));
        let author = Keypair::generate();
        let root = signed(&author, UnsignedEvent::new(kinds::TEXT_NOTE, "root", "").at(1));

        let reply = signed(
            &Keypair::generate(),
            Replies::draft(&root.id, "hi".to_string(), "").at(2),
        );
        assert_eq!(ingest(&h, &replies, &reply), Outcome::Buffered);
        assert!(replies.get(&root.id).is_empty());
        assert_eq!(replies.pending_len(), 1);

        let root_uid = h.services.store.insert(root.clone()).uid();
        assert_eq!(replies.resolve(root_uid), 1);
        assert_eq!(replies.get(&root.id).len(), 1);
        assert_eq!(replies.pending_len(), 0);
    }

    #[tokio::test]
    async fn pending_buffer_is_bounded() {
        let h = harness();
        let replies = ReactionIndex::<Replies>::new(h.services.clone(), &config(0));
        let who = Keypair::generate();
        let reply = |target: &str, at: u64| {
            signed(&who, Replies::draft(target, format!("{at}"), "").at(at))
        };

        for at in 1..=5 {
            ingest(&h, &replies, &reply("t1", at));
        }
        assert_eq!(replies.pending_len(), 2);

        ingest(&h, &replies, &reply("t2", 1));
        ingest(&h, &replies, &reply("t3", 1));
        // t1 waited longest and was dropped.
        assert_eq!(replies.pending_len(), 2);
        let t1 = h.services.registry.intern("t1");
        assert_eq!(replies.resolve(t1), 0);
    }

    #[tokio::test]
    async fn submit_is_visible_before_publish_and_confirmed_by_echo() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(0));

        let event = likes.submit("t", Vote::Like).await.unwrap().unwrap();
        let me = h.me.public_key();
        let entry = likes.entry("t", &me).unwrap();
        assert_eq!(entry.provenance, Provenance::LocalPending);
        assert_eq!(h.relay.published().len(), 1);

        // The relay echo collapses the entry to confirmed.
        let uid = h.services.store.insert(event.clone()).uid();
        assert_eq!(likes.ingest(&event, uid), Outcome::Merged(Merge::Confirmed));
        assert_eq!(likes.entry("t", &me).unwrap().provenance, Provenance::Confirmed);
        assert_eq!(likes.get("t").len(), 1);
    }

    #[tokio::test]
    async fn repeated_submit_is_idempotent_and_change_of_mind_wins() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(0));

        assert!(likes.submit("t", Vote::Like).await.unwrap().is_some());
        assert!(likes.submit("t", Vote::Like).await.unwrap().is_none());
        assert_eq!(h.relay.published().len(), 1);

        let retract = likes.submit("t", Vote::Retract).await.unwrap().unwrap();
        assert!(likes.get("t").is_empty());
        assert!(retract.created_at > h.relay.published()[0].created_at);
    }

    #[tokio::test]
    async fn failed_publish_keeps_pending_entry_and_returns_event() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(0));
        h.relay.fail_publishes(true);

        let err = likes.submit("t", Vote::Like).await.unwrap_err();
        let event = err.event().cloned().unwrap();
        assert_eq!(likes.get("t").len(), 1);
        assert_eq!(
            likes.entry("t", &h.me.public_key()).unwrap().provenance,
            Provenance::LocalPending
        );

        h.relay.fail_publishes(false);
        likes.republish(&event).await.unwrap();
        assert_eq!(h.relay.published(), vec![event]);
    }

    #[tokio::test]
    async fn snapshot_restores_into_fresh_index() {
        let h = harness();
        let likes = ReactionIndex::<Likes>::new(h.services.clone(), &config(0));
        ingest(&h, &likes, &like(&Keypair::generate(), "t", "+", 1));
        likes.submit("t", Vote::Like).await.unwrap();
        let records = likes.snapshot();
        assert_eq!(records.len(), 2);

        let fresh = harness();
        let restored = ReactionIndex::<Likes>::new(fresh.services.clone(), &config(0));
        assert_eq!(restored.restore(&records), 2);
        assert_eq!(restored.get("t").len(), 2);
        assert_eq!(restored.snapshot(), records);
        assert_eq!(restored.restore(&records), 0);
    }
}
