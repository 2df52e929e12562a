//! Reposts: kind 6 for text notes, kind 16 for everything else.
//!
//! The reposted event is the first `e` tag. A repost is counted only once the
//! reposted event itself is known.

use std::collections::HashSet;

use trustmesh::{kinds, Event, Uid, UnsignedEvent};

use super::{Entries, Reaction, ReactionKind};

pub struct Reposts;

impl ReactionKind for Reposts {
    const NAME: &'static str = "reposts";
    const KINDS: &'static [u32] = &[kinds::REPOST, kinds::GENERIC_REPOST];
    const AWAITS_TARGET: bool = true;

    type Value = ();
    type Draft = ();
    /// Identities that reposted.
    type Aggregate = HashSet<Uid>;

    fn parse(event: &Event) -> Option<Reaction<()>> {
        if !Self::KINDS.contains(&event.kind) {
            return None;
        }
        Some(Reaction {
            target: event.first_tag("e")?.to_string(),
            key: event.pubkey.clone(),
            actor: event.pubkey.clone(),
            value: (),
        })
    }

    fn draft(target: &str, _: (), author: &str) -> UnsignedEvent {
        UnsignedEvent::new(kinds::REPOST, "", author).tag(["e", target])
    }

    fn aggregate(entries: &Entries<()>) -> HashSet<Uid> {
        entries.values().map(|e| e.value.actor).collect()
    }
}
