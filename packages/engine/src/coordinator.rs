//! Live query coordinator.
//!
//! Every component that wants live events for a [`Filter`] goes through
//! [`Coordinator::open`]. Identical filters share one relay query: the first
//! open starts it, later opens only bump a reference count, and the query is
//! torn down when the last [`SubscriptionHandle`] is dropped.
//!
//! Events from every live query are forwarded to the engine's ingest channel
//! before they are fanned out to handles, so indices are updated no matter
//! who asked for the query.
//!
//! Each query carries a generation number. A handle only ever releases the
//! generation it was issued for, so a handle that outlives a failed query
//! cannot close the fresh query that replaced it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use trustmesh::{Event, Filter};

use crate::error::SubscribeError;
use crate::transport::{QueryMode, Transport};

/// Lifecycle of one relay query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    /// Requested; the transport has not answered yet.
    Opening,
    /// Receiving events.
    Live,
    /// The relay closed the stream.
    Ended,
    /// The transport refused to open the query.
    Failed(String),
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Shared, reference-counted live queries. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    ingest: mpsc::UnboundedSender<Event>,
    capacity: usize,
    queries: Mutex<HashMap<Filter, Query>>,
    next_generation: AtomicU64,
}

struct Query {
    generation: u64,
    id: String,
    refs: usize,
    events: broadcast::Sender<Event>,
    state: watch::Receiver<QueryState>,
    task: JoinHandle<()>,
}

impl Coordinator {
    /// `ingest` receives every event from every live query. `capacity` is the
    /// per-query buffer for handles that read events themselves.
    pub fn new(
        transport: Arc<dyn Transport>,
        ingest: mpsc::UnboundedSender<Event>,
        capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                ingest,
                capacity: capacity.max(1),
                queries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Join the live query for `filter`, starting it if nobody holds it.
    ///
    /// Returns immediately; the query comes up in the background. Use
    /// [`open_ready`](Self::open_ready) to wait for it.
    pub fn open(&self, filter: Filter) -> SubscriptionHandle {
        let mut queries = self.inner.lock();

        if let Some(q) = queries.get_mut(&filter) {
            q.refs += 1;
            debug!(query = %q.id, refs = q.refs, "joined live query");
            return SubscriptionHandle {
                owner: Arc::downgrade(&self.inner),
                filter,
                generation: q.generation,
                id: q.id.clone(),
                events: q.events.subscribe(),
                state: q.state.clone(),
            };
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let id = uuid::Uuid::now_v7().to_string();
        let (events, rx) = broadcast::channel(self.inner.capacity);
        let (state_tx, state) = watch::channel(QueryState::Opening);

        let task = tokio::spawn(run_query(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.transport),
            self.inner.ingest.clone(),
            filter.clone(),
            generation,
            events.clone(),
            state_tx,
        ));

        info!(query = %id, kinds = ?filter.kinds, refs = ?filter.event_refs, "opening live query");
        queries.insert(
            filter.clone(),
            Query {
                generation,
                id: id.clone(),
                refs: 1,
                events,
                state: state.clone(),
                task,
            },
        );

        SubscriptionHandle {
            owner: Arc::downgrade(&self.inner),
            filter,
            generation,
            id,
            events: rx,
            state,
        }
    }

    /// As [`open`](Self::open), but wait until the relay answers.
    ///
    /// On failure the handle is released before the error is returned.
    pub async fn open_ready(&self, filter: Filter) -> Result<SubscriptionHandle, SubscribeError> {
        let mut handle = self.open(filter);
        handle.ready().await?;
        Ok(handle)
    }

    /// Number of distinct live queries currently open.
    pub fn active_queries(&self) -> usize {
        self.inner.lock().len()
    }

    /// How many handles share the query for `filter`.
    pub fn ref_count(&self, filter: &Filter) -> usize {
        self.inner.lock().get(filter).map_or(0, |q| q.refs)
    }

    /// Abort every live query. Outstanding handles stay valid but receive
    /// nothing further.
    pub fn shutdown(&self) {
        let drained: Vec<Query> = self.inner.lock().drain().map(|(_, q)| q).collect();
        for q in &drained {
            q.task.abort();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "closed all live queries");
        }
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Filter, Query>> {
        self.queries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn release(&self, filter: &Filter, generation: u64) {
        let mut queries = self.lock();
        let Some(q) = queries.get_mut(filter) else {
            return;
        };
        if q.generation != generation {
            return;
        }
        q.refs = q.refs.saturating_sub(1);
        debug!(query = %q.id, refs = q.refs, "left live query");
        if q.refs == 0 {
            if let Some(q) = queries.remove(filter) {
                q.task.abort();
                info!(query = %q.id, "closed live query");
            }
        }
    }

    /// Forget a query that stopped on its own, so the next open starts over.
    fn evict(&self, filter: &Filter, generation: u64) {
        let mut queries = self.lock();
        if queries.get(filter).is_some_and(|q| q.generation == generation) {
            queries.remove(filter);
        }
    }
}

async fn run_query(
    owner: Weak<Inner>,
    transport: Arc<dyn Transport>,
    ingest: mpsc::UnboundedSender<Event>,
    filter: Filter,
    generation: u64,
    events: broadcast::Sender<Event>,
    state: watch::Sender<QueryState>,
) {
    match transport.query(&filter, QueryMode::Live).await {
        Ok(mut stream) => {
            state.send_replace(QueryState::Live);
            while let Some(event) = stream.next().await {
                if ingest.send(event.clone()).is_err() {
                    debug!("ingest channel closed, stopping live query");
                    break;
                }
                // Handles that do not read events are fine.
                let _ = events.send(event);
            }
            state.send_replace(QueryState::Ended);
        }
        Err(e) => {
            warn!(error = %e, kinds = ?filter.kinds, "live query failed");
            state.send_replace(QueryState::Failed(e.to_string()));
        }
    }
    if let Some(inner) = owner.upgrade() {
        inner.evict(&filter, generation);
    }
}

// ---------------------------------------------------------------------------
// SubscriptionHandle
// ---------------------------------------------------------------------------

/// A share in one live query.
///
/// Not `Clone`: each handle is released exactly once, when it is dropped.
pub struct SubscriptionHandle {
    owner: Weak<Inner>,
    filter: Filter,
    generation: u64,
    id: String,
    events: broadcast::Receiver<Event>,
    state: watch::Receiver<QueryState>,
}

impl SubscriptionHandle {
    /// Relay-facing subscription id, unique per query generation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> QueryState {
        self.state.borrow().clone()
    }

    /// Wait until the query is live, or report why it never will be.
    pub async fn ready(&mut self) -> Result<(), SubscribeError> {
        let state = self
            .state
            .wait_for(|s| *s != QueryState::Opening)
            .await
            .map(|s| (*s).clone());
        match state {
            Ok(QueryState::Live) => Ok(()),
            Ok(QueryState::Failed(reason)) => Err(SubscribeError::Failed(reason)),
            _ => Err(SubscribeError::Ended),
        }
    }

    /// Next event delivered to this query after the handle was issued.
    ///
    /// Returns `None` once the query is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.events.recv().await {
                Ok(e) => return Some(e),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(query = %self.id, lagged = count, "handle lagged, events dropped");
                }
            }
        }
    }

    /// Next buffered event, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.events.try_recv() {
                Ok(e) => return Some(e),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.release(&self.filter, self.generation);
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
