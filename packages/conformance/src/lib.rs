//! Shared helpers for the trustmesh conformance suite.
//!
//! [`spawn_engine`] starts an engine wired to a fresh in-process
//! [`MemoryRelay`] and hands back both, so tests can push events "from the
//! network" and inspect what the engine published. The event builders sign
//! with throwaway keys and fixed timestamps.

use std::sync::Arc;
use std::time::Duration;

use trustmesh::{
    draft_assertion, kinds, EntityType, Event, Keypair, Signer, TrustValue, UnsignedEvent,
};
use trustmesh_engine::transport::memory::MemoryRelay;
use trustmesh_engine::{Engine, EngineConfig};

/// A running engine, the relay it talks to, and the local identity.
pub struct Node {
    pub relay: Arc<MemoryRelay>,
    pub engine: Arc<Engine>,
    pub keys: Keypair,
}

impl Node {
    pub fn pubkey(&self) -> String {
        self.keys.public_key()
    }
}

/// Start an engine on a fresh relay with a fresh identity.
///
/// Must be called inside a tokio runtime.
pub fn spawn_engine(config: EngineConfig) -> Node {
    let relay = Arc::new(MemoryRelay::new());
    let keys = Keypair::generate();
    let engine = Engine::start(config, relay.clone(), Arc::new(keys.clone()));
    Node {
        relay,
        engine,
        keys,
    }
}

/// Config with the given throttle and defaults elsewhere.
pub fn config(throttle_ms: u64) -> EngineConfig {
    EngineConfig {
        throttle: Duration::from_millis(throttle_ms),
        ..EngineConfig::default()
    }
}

/// Let spawned tasks (live queries, the ingest loop) catch up.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub fn note(keys: &Keypair, content: &str, at: u64) -> Event {
    sign(keys, UnsignedEvent::new(kinds::TEXT_NOTE, content, "").at(at))
}

pub fn like(keys: &Keypair, target: &str, at: u64) -> Event {
    sign(
        keys,
        UnsignedEvent::new(kinds::REACTION, "+", "")
            .tag(["e", target])
            .at(at),
    )
}

pub fn reply(keys: &Keypair, target: &str, content: &str, at: u64) -> Event {
    sign(
        keys,
        UnsignedEvent::new(kinds::TEXT_NOTE, content, "")
            .tag(["e", target, "", "reply"])
            .at(at),
    )
}

pub fn trust(keys: &Keypair, target: &str, value: TrustValue) -> Event {
    sign(keys, draft_assertion("", target, value, EntityType::Key))
}

/// A zap request by `zapper` and the receipt a wallet would publish for it.
pub fn zap(zapper: &Keypair, target: &str, msats: u64, at: u64) -> (Event, Event) {
    let amount = msats.to_string();
    let request = sign(
        zapper,
        UnsignedEvent::new(kinds::ZAP_REQUEST, "", "")
            .tag(["e", target])
            .tag(["amount", amount.as_str()])
            .at(at),
    );
    let receipt = zap_receipt(&request, at + 1);
    (request, receipt)
}

/// A wallet's receipt for `request`, stamped `at`.
pub fn zap_receipt(request: &Event, at: u64) -> Event {
    let target = request.first_tag("e").unwrap_or_default();
    let description = serde_json::to_string(request).unwrap_or_default();
    sign(
        &Keypair::generate(),
        UnsignedEvent::new(kinds::ZAP_RECEIPT, "", "")
            .tag(["e", target])
            .tag(["P", request.pubkey.as_str()])
            .tag(["description", description.as_str()])
            .at(at),
    )
}

/// # Panics
///
/// Panics if the keypair cannot sign the draft.
pub fn sign(keys: &Keypair, draft: UnsignedEvent) -> Event {
    keys.sign(draft).expect("signing a test event")
}
