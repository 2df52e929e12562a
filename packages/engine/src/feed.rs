//! Paginated feed with live "new items" detection.
//!
//! A [`FeedCursor`] walks backwards through history with `until`/`limit`
//! pages and remembers every event id it has emitted, so overlapping pages
//! from relays never produce duplicates. `until` is inclusive, so the cursor
//! never steps past a second on its own: it widens the next page's limit by
//! the number of events already emitted at that second instead, and stops
//! when a page brings nothing new. Optionally it also holds a live
//! query for events newer than the feed and buffers them until the caller
//! asks for them.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::debug;
use trustmesh::{Event, Filter};

use crate::coordinator::{Coordinator, SubscriptionHandle};
use crate::error::TransportError;
use crate::transport::{QueryMode, Transport};

/// Pages fetched per `load_next` call before giving up on filling a batch.
const MAX_ROUNDS: usize = 8;

pub struct FeedCursor {
    transport: Arc<dyn Transport>,
    coordinator: Coordinator,
    ingest: mpsc::UnboundedSender<Event>,
    filter: Filter,
    page: usize,

    until: Option<u64>,
    /// Events already emitted whose `created_at` equals `until`.
    seen_at_until: usize,
    newest: Option<u64>,
    exhausted: bool,
    seen: HashSet<String>,
    items: Vec<String>,

    live: Option<SubscriptionHandle>,
    fresh: Vec<Event>,
}

impl FeedCursor {
    /// A cursor over events matching `filter`. Any `until`, `since` or
    /// `limit` on the filter is replaced by the cursor's own.
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: Coordinator,
        ingest: mpsc::UnboundedSender<Event>,
        mut filter: Filter,
        page: usize,
    ) -> Self {
        filter.until = None;
        filter.since = None;
        filter.limit = None;
        Self {
            transport,
            coordinator,
            ingest,
            filter,
            page: page.max(1),
            until: None,
            seen_at_until: 0,
            newest: None,
            exhausted: false,
            seen: HashSet::new(),
            items: Vec::new(),
            live: None,
            fresh: Vec::new(),
        }
    }

    /// Every id emitted so far, newest first.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Stop paging; later `load_next` calls return nothing.
    pub fn mark_done(&mut self) {
        self.exhausted = true;
    }

    /// [`load_next`](Self::load_next) with the configured page size.
    pub async fn load_default(&mut self) -> Result<Vec<String>, TransportError> {
        self.load_next(self.page).await
    }

    /// Fetch up to `batch` events older than everything emitted so far.
    ///
    /// Returns the ids of events not emitted before, newest first. An empty
    /// result with `is_exhausted()` set means the history is used up.
    pub async fn load_next(&mut self, batch: usize) -> Result<Vec<String>, TransportError> {
        let mut out = Vec::new();
        let mut rounds = 0;

        while out.len() < batch && !self.exhausted && rounds < MAX_ROUNDS {
            rounds += 1;
            let want = batch - out.len();
            // Events at `until` we already emitted come back again; ask for
            // enough beyond them to make progress.
            let limit = want + self.seen_at_until;
            let mut page = self.filter.clone().limit(limit);
            page.until = self.until;

            let mut events: Vec<Event> = self
                .transport
                .query(&page, QueryMode::Historical)
                .await?
                .take(limit)
                .collect()
                .await;
            events.retain(|e| page.matches(e));

            events.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            let Some(oldest) = events.last().map(|e| e.created_at) else {
                debug!("feed history exhausted");
                self.exhausted = true;
                break;
            };
            let newest = events.first().map_or(oldest, |e| e.created_at);
            self.newest = Some(self.newest.map_or(newest, |n| n.max(newest)));

            // The cursor only moves down to the last event it looked at;
            // anything below that comes back with the next page.
            let mut reached = oldest;
            let mut fresh_at_reached = 0;
            let mut progressed = false;
            for event in events {
                if out.len() >= batch {
                    break;
                }
                if event.created_at != reached {
                    reached = event.created_at;
                    fresh_at_reached = 0;
                }
                if self.seen.insert(event.id.clone()) {
                    progressed = true;
                    fresh_at_reached += 1;
                    out.push(event.id.clone());
                    // Page results feed the indices like live events do.
                    let _ = self.ingest.send(event);
                }
            }

            if !progressed {
                debug!("feed history exhausted");
                self.exhausted = true;
                break;
            }

            let carried = if self.until == Some(reached) {
                self.seen_at_until
            } else {
                0
            };
            self.seen_at_until = carried + fresh_at_reached;
            self.until = Some(reached);
        }

        self.items.extend(out.iter().cloned());
        Ok(out)
    }

    /// Start watching for events newer than the feed.
    pub fn start_live(&mut self) {
        if self.live.is_some() {
            return;
        }
        let since = self
            .newest
            .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64);
        let filter = self.filter.clone().since(since);
        self.live = Some(self.coordinator.open(filter));
    }

    /// Stop watching. Buffered new events are kept.
    pub fn stop_live(&mut self) {
        self.live = None;
    }

    /// Whether unseen newer events are waiting.
    pub fn has_new(&mut self) -> bool {
        self.drain_live();
        !self.fresh.is_empty()
    }

    /// Take the waiting newer events, newest first, and prepend them to the
    /// feed.
    pub fn take_new(&mut self) -> Vec<String> {
        self.drain_live();
        let mut fresh = std::mem::take(&mut self.fresh);
        fresh.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut ids = Vec::with_capacity(fresh.len());
        for event in fresh {
            if self.seen.insert(event.id.clone()) {
                self.newest = Some(self.newest.map_or(event.created_at, |n| n.max(event.created_at)));
                ids.push(event.id);
            }
        }
        let older = std::mem::replace(&mut self.items, ids.clone());
        self.items.extend(older);
        ids
    }

    fn drain_live(&mut self) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        while let Some(event) = live.try_recv() {
            if !self.seen.contains(&event.id) && !self.fresh.iter().any(|e| e.id == event.id) {
                self.fresh.push(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryRelay;
    use trustmesh::{kinds, Keypair, Signer, UnsignedEvent};

    fn note(keys: &Keypair, at: u64) -> Event {
        keys.sign(UnsignedEvent::new(kinds::TEXT_NOTE, format!("note {at}"), "").at(at))
            .unwrap()
    }

    fn cursor(relay: &Arc<MemoryRelay>) -> (FeedCursor, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(relay.clone(), tx.clone(), 16);
        let filter = Filter::new().kinds([kinds::TEXT_NOTE]);
        (FeedCursor::new(relay.clone(), coordinator, tx, filter, 10), rx)
    }

    #[tokio::test]
    async fn pages_walk_backwards_without_duplicates() {
        let relay = Arc::new(MemoryRelay::new());
        let keys = Keypair::generate();
        relay.seed((1..=25).map(|i| note(&keys, 1000 + i)));
        let (mut feed, _rx) = cursor(&relay);

        let mut all = Vec::new();
        loop {
            let page = feed.load_next(10).await.unwrap();
            if page.is_empty() {
                break;
            }
            all.extend(page);
        }
        assert!(feed.is_exhausted());
        assert_eq!(all.len(), 25);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 25);
        assert_eq!(feed.items(), all.as_slice());
    }

    #[tokio::test]
    async fn same_second_events_across_a_page_boundary_are_not_lost() {
        let relay = Arc::new(MemoryRelay::new());
        relay.seed((0..6).map(|_| note(&Keypair::generate(), 500)));
        relay.seed([note(&Keypair::generate(), 400)]);
        let (mut feed, _rx) = cursor(&relay);

        let first = feed.load_next(4).await.unwrap();
        assert_eq!(first.len(), 4);
        let rest = feed.load_next(10).await.unwrap();
        assert_eq!(first.len() + rest.len(), 7);
    }

    #[tokio::test]
    async fn small_batches_do_not_skip_same_second_events() {
        let relay = Arc::new(MemoryRelay::new());
        relay.seed((0..6).map(|_| note(&Keypair::generate(), 500)));
        relay.seed([note(&Keypair::generate(), 400)]);
        let (mut feed, _rx) = cursor(&relay);

        let mut all = Vec::new();
        let mut pages = 0;
        loop {
            let page = feed.load_next(2).await.unwrap();
            if page.is_empty() {
                break;
            }
            pages += 1;
            assert!(page.len() <= 2);
            all.extend(page);
        }
        assert_eq!(pages, 4);
        assert_eq!(all.len(), 7);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 7);
        assert!(feed.is_exhausted());
    }

    #[tokio::test]
    async fn a_full_batch_resumes_inside_the_page_it_stopped_in() {
        let relay = Arc::new(MemoryRelay::new());
        relay.seed([
            note(&Keypair::generate(), 300),
            note(&Keypair::generate(), 300),
            note(&Keypair::generate(), 200),
        ]);
        let (mut feed, _rx) = cursor(&relay);

        let first = feed.load_next(1).await.unwrap();
        let second = feed.load_next(1).await.unwrap();
        let third = feed.load_next(1).await.unwrap();
        assert_eq!(first.len() + second.len() + third.len(), 3);
        assert!(feed.load_next(1).await.unwrap().is_empty());
        let unique: HashSet<_> = feed.items().iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn mark_done_stops_paging() {
        let relay = Arc::new(MemoryRelay::new());
        relay.seed([note(&Keypair::generate(), 1)]);
        let (mut feed, _rx) = cursor(&relay);
        feed.mark_done();
        assert!(feed.load_next(10).await.unwrap().is_empty());
        assert_eq!(relay.queries_opened(), 0);
    }

    #[tokio::test]
    async fn live_events_wait_until_taken() {
        let relay = Arc::new(MemoryRelay::new());
        let keys = Keypair::generate();
        relay.seed([note(&keys, 100)]);
        let (mut feed, _rx) = cursor(&relay);
        feed.load_next(10).await.unwrap();

        feed.start_live();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(!feed.has_new());

        let newer = note(&keys, 200);
        relay.push(newer.clone());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert!(feed.has_new());
        assert_eq!(feed.take_new(), vec![newer.id.clone()]);
        assert!(!feed.has_new());
        assert_eq!(feed.items()[0], newer.id);
        assert_eq!(feed.items().len(), 2);
    }
}
