//! Relay transport abstraction.
//!
//! The [`Transport`] trait is the only thing the engine knows about the
//! network. It opens queries and publishes signed events; everything about
//! connection pooling, relay selection and wire framing sits behind it.
//!
//! # Implementations
//!
//! | Type | When to use |
//! |------|-------------|
//! | [`MemoryRelay`] | Tests, the conformance suite, offline demos |
//!
//! [`MemoryRelay`]: memory::MemoryRelay

pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;
use trustmesh::{Event, Filter};

use crate::error::TransportError;

/// Events delivered by one query, in the order relays sent them.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// How long a query stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Stored events only. The stream ends once relays report that their
    /// stored results are exhausted.
    Historical,
    /// Stored events followed by new ones as they arrive. The stream only
    /// ends when relays close it; dropping it closes the query.
    Live,
}

/// Network access for the engine.
///
/// Implementations must be cheap to call concurrently. A query is closed by
/// dropping its stream.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn query(&self, filter: &Filter, mode: QueryMode) -> Result<EventStream, TransportError>;

    async fn publish(&self, event: &Event) -> Result<(), TransportError>;
}
