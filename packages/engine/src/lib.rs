//! Live indexing for trustmesh.
//!
//! This crate puts the synchronous [`trustmesh`] core on the network: it opens
//! and shares relay queries, routes incoming events into the trust graph and
//! the reaction indices, throttles change notifications, publishes local
//! trust assertions and reactions optimistically, and pages through feeds.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | [`Engine`] façade with explicit `start` / `dispose` |
//! | [`transport`] | The [`Transport`] trait and the in-process [`MemoryRelay`] |
//! | [`coordinator`] | Reference-counted live queries, [`SubscriptionHandle`] |
//! | [`throttle`] | Leading-and-trailing notification throttle |
//! | [`reactions`] | [`ReactionIndex`] and the likes / reposts / replies / zaps kinds |
//! | [`trust`] | [`TrustService`]: graph access and `publish_trust` |
//! | [`feed`] | [`FeedCursor`] pagination and new-item detection |
//! | [`snapshot`] | [`SnapshotStore`] with memory and SQLite backends |
//! | [`config`] | [`EngineConfig`] from environment variables |
//! | [`error`] | Error enums surfaced to callers |
//!
//! [`MemoryRelay`]: transport::memory::MemoryRelay
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trustmesh::Keypair;
//! use trustmesh_engine::{Engine, EngineConfig};
//!
//! let engine = Engine::start(EngineConfig::from_env(), transport, Arc::new(Keypair::generate()));
//!
//! let mut likes = engine.likes().add_listener(&note_id);
//! while let Some(n) = likes.recv().await {
//!     println!("{} likes", n.aggregate.len());
//! }
//!
//! engine.dispose();
//! ```

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod feed;
pub mod reactions;
pub mod snapshot;
pub mod throttle;
pub mod transport;
pub mod trust;

pub use config::EngineConfig;
pub use coordinator::{Coordinator, QueryState, SubscriptionHandle};
pub use engine::{Engine, SNAPSHOT_KEY};
pub use error::{PublishError, StoreError, SubscribeError, TransportError};
pub use feed::FeedCursor;
pub use reactions::{
    Likes, Listener, Notification, Outcome, ReactionIndex, ReactionKind, Replies, Reposts, Vote,
    ZapDraft, ZapTotals, Zaps,
};
pub use snapshot::SnapshotStore;
pub use transport::{EventStream, QueryMode, Transport};
pub use trust::TrustService;
