//! Error types surfaced to engine callers.
//!
//! Malformed network input never shows up here; it is logged and dropped at
//! ingestion. These errors cover what the caller asked for directly: a
//! publish, a subscription, or a snapshot round-trip.

use trustmesh::{Event, SigningError, SnapshotError};

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No relay could be reached.
    #[error("relay unreachable: {0}")]
    Unreachable(String),

    /// The relay answered but refused the event or query.
    #[error("relay rejected request: {0}")]
    Rejected(String),

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

/// Failure to publish a locally created event.
///
/// The local optimistic state is kept; the caller decides whether to retry.
/// Publishes are never retried automatically, to avoid duplicate side
/// effects.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    /// The drafted event did not pass our own parser.
    #[error("refusing to publish malformed draft: {0}")]
    Draft(String),

    /// The event was signed and applied locally but the relay call failed.
    /// Pass `event` to `republish` to retry.
    #[error("publishing event {id} failed: {source}", id = .event.id)]
    Transport {
        event: Box<Event>,
        source: TransportError,
    },
}

impl PublishError {
    /// The signed event, when the failure happened after signing.
    pub fn event(&self) -> Option<&Event> {
        match self {
            PublishError::Transport { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Failure to bring a live query up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("live query failed: {0}")]
    Failed(String),

    #[error("live query ended before it went live")]
    Ended,
}

/// Errors from a [`SnapshotStore`](crate::snapshot::SnapshotStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("internal storage error: {0}")]
    Internal(String),
}
