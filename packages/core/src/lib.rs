//! Web-of-trust core for relay-based event networks.
//!
//! This crate is the synchronous, I/O-free half of trustmesh: the types that
//! come off the wire, the identity registry and event store every other
//! component indexes into, and the trust graph that turns trust assertions
//! into bounded-degree scores. The async services that talk to relays live in
//! `trustmesh-engine`.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | [`Event`], [`UnsignedEvent`], [`EntityType`], [`TrustValue`], event [`kinds`] |
//! | [`filter`] | Relay query [`Filter`] |
//! | [`registry`] | String → [`Uid`] interning |
//! | [`store`] | Canonical events by [`Uid`] |
//! | [`lww`] | Last-write-wins registers with [`Provenance`] |
//! | [`assertion`] | Parsing and drafting trust assertions |
//! | [`graph`] | [`TrustGraph`], [`TrustScore`] |
//! | [`validation`] | Structural event checks via [`validate_event`] |
//! | [`signing`] | [`Keypair`], the [`Signer`] trait, event ids |
//! | [`snapshot`] | Serializable graph and index records |
//! | [`render`] | Plain-text rendering of scores and snapshots |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trustmesh::{Registry, TrustGraph};
//!
//! let registry = Arc::new(Registry::new());
//! let mut graph = TrustGraph::new(Arc::clone(&registry));
//! graph.set_viewer(registry.intern(&my_pubkey));
//!
//! for event in events {
//!     let uid = registry.intern(&event.id);
//!     graph.ingest(&event, uid);
//! }
//!
//! let score = graph.score_of(registry.intern(&someone), registry.intern(&my_pubkey));
//! ```

pub mod assertion;
pub mod filter;
pub mod graph;
pub mod lww;
pub mod registry;
pub mod render;
pub mod signing;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod validation;

pub use assertion::{draft_assertion, AssertionError, TrustAssertion};
pub use filter::Filter;
pub use graph::{Assessment, Edge, TrustGraph, TrustScore, MAX_DEGREE};
pub use lww::{Merge, Provenance, Stamped};
pub use registry::{Registry, Uid};
pub use signing::{event_id, Keypair, Signer, SigningError};
pub use snapshot::{EdgeRecord, EntryRecord, GraphSnapshot, SnapshotError, SNAPSHOT_VERSION};
pub use store::{EventStore, Inserted};
pub use types::{kinds, EntityType, Event, TrustValue, UnsignedEvent};
pub use validation::{validate_event, ValidationError};
