//! In-process relay.
//!
//! Holds every event it has seen behind a [`RwLock`] and fans new ones out to
//! open live queries through a broadcast channel. Published events are stored
//! and echoed back to live queries the way a real relay would. Failure
//! switches and counters make it usable as a test double.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use trustmesh::{Event, Filter};

use super::{EventStream, QueryMode, Transport};
use crate::error::TransportError;

const LIVE_BUFFER: usize = 1024;

pub struct MemoryRelay {
    events: RwLock<HashMap<String, Event>>,
    published: RwLock<Vec<Event>>,
    live: broadcast::Sender<Event>,
    fail_queries: AtomicBool,
    fail_publishes: AtomicBool,
    queries_opened: AtomicUsize,
    live_open: Arc<AtomicUsize>,
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            events: RwLock::new(HashMap::new()),
            published: RwLock::new(Vec::new()),
            live,
            fail_queries: AtomicBool::new(false),
            fail_publishes: AtomicBool::new(false),
            queries_opened: AtomicUsize::new(0),
            live_open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Store events as history. Open live queries are not told.
    pub fn seed(&self, events: impl IntoIterator<Item = Event>) {
        let mut stored = self.events.write().unwrap_or_else(|p| p.into_inner());
        for event in events {
            stored.insert(event.id.clone(), event);
        }
    }

    /// Store an event and deliver it to every open live query.
    pub fn push(&self, event: Event) {
        self.events
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(event.id.clone(), event.clone());
        // No open live query is not an error.
        let _ = self.live.send(event);
    }

    /// Every event accepted through [`Transport::publish`], in order.
    pub fn published(&self) -> Vec<Event> {
        self.published
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Make every subsequent query fail until switched back.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent publish fail until switched back.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Queries opened so far, historical and live.
    pub fn queries_opened(&self) -> usize {
        self.queries_opened.load(Ordering::SeqCst)
    }

    /// Live query streams that have not been dropped yet.
    pub fn live_queries(&self) -> usize {
        self.live_open.load(Ordering::SeqCst)
    }

    /// Stored events matching `filter`, newest first, truncated to its limit.
    fn stored(&self, filter: &Filter) -> Vec<Event> {
        let mut matching: Vec<Event> = self
            .events
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }
}

#[async_trait]
impl Transport for MemoryRelay {
    async fn query(&self, filter: &Filter, mode: QueryMode) -> Result<EventStream, TransportError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("memory relay is offline".into()));
        }
        self.queries_opened.fetch_add(1, Ordering::SeqCst);

        match mode {
            QueryMode::Historical => Ok(Box::pin(tokio_stream::iter(self.stored(filter)))),
            QueryMode::Live => {
                // Subscribe before reading history so nothing pushed in
                // between is missed. Overlap is deduplicated downstream.
                let rx = self.live.subscribe();
                let history = tokio_stream::iter(self.stored(filter));
                let filter = filter.clone();
                let live = BroadcastStream::new(rx)
                    .filter_map(move |r| r.ok().filter(|e| filter.matches(e)));

                self.live_open.fetch_add(1, Ordering::SeqCst);
                Ok(Box::pin(Tracked {
                    inner: Box::pin(history.chain(live)),
                    _guard: LiveGuard(Arc::clone(&self.live_open)),
                }))
            }
        }
    }

    async fn publish(&self, event: &Event) -> Result<(), TransportError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("memory relay refuses writes".into()));
        }
        self.published
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        self.push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Live stream bookkeeping
// ---------------------------------------------------------------------------

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Tracked {
    inner: EventStream,
    _guard: LiveGuard,
}

impl Stream for Tracked {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.inner.as_mut().poll_next(cx)
    }
}
