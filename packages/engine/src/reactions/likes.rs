//! Likes: kind 7 reactions.
//!
//! The target is the last `e` tag. Content `-` withdraws a previous like;
//! any other content counts as a like, emoji included.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use trustmesh::{kinds, Event, Uid, UnsignedEvent};

use super::{Entries, Reaction, ReactionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Like,
    Retract,
}

pub struct Likes;

impl ReactionKind for Likes {
    const NAME: &'static str = "likes";
    const KINDS: &'static [u32] = &[kinds::REACTION];
    const AWAITS_TARGET: bool = false;

    type Value = Vote;
    type Draft = Vote;
    /// Identities with a standing like.
    type Aggregate = HashSet<Uid>;

    fn parse(event: &Event) -> Option<Reaction<Vote>> {
        if event.kind != kinds::REACTION {
            return None;
        }
        let value = if event.content == "-" {
            Vote::Retract
        } else {
            Vote::Like
        };
        Some(Reaction {
            target: event.last_tag("e")?.to_string(),
            key: event.pubkey.clone(),
            actor: event.pubkey.clone(),
            value,
        })
    }

    fn draft(target: &str, vote: Vote, author: &str) -> UnsignedEvent {
        let content = match vote {
            Vote::Like => "+",
            Vote::Retract => "-",
        };
        UnsignedEvent::new(kinds::REACTION, content, author).tag(["e", target])
    }

    fn aggregate(entries: &Entries<Vote>) -> HashSet<Uid> {
        entries
            .values()
            .filter(|e| e.value.value == Vote::Like)
            .map(|e| e.value.actor)
            .collect()
    }
}
