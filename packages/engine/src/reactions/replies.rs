//! Replies: kind 1 notes that reference another event.
//!
//! The replied-to event is the `e` tag marked `reply`, else the one marked
//! `root`, else the last `e` tag that is not marked `mention`. Notes without
//! such a tag are not replies.
//! Every reply is its own entry, keyed by its event id.

use std::collections::HashSet;

use trustmesh::{kinds, Event, Uid, UnsignedEvent};

use super::{Entries, Reaction, ReactionKind};

pub struct Replies;

fn marked<'a>(event: &'a Event, marker: &str) -> Option<&'a str> {
    event
        .tags_named("e")
        .find(|t| t.get(3).map(String::as_str) == Some(marker))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

/// The event `event` replies to, if any.
pub fn reply_target(event: &Event) -> Option<&str> {
    marked(event, "reply")
        .or_else(|| marked(event, "root"))
        .or_else(|| {
            event
                .tags_named("e")
                .filter(|t| t.get(3).map(String::as_str) != Some("mention"))
                .filter_map(|t| t.get(1))
                .last()
                .map(String::as_str)
        })
}

impl ReactionKind for Replies {
    const NAME: &'static str = "replies";
    const KINDS: &'static [u32] = &[kinds::TEXT_NOTE];
    const AWAITS_TARGET: bool = true;

    type Value = ();
    /// Reply text.
    type Draft = String;
    /// Reply events.
    type Aggregate = HashSet<Uid>;

    fn parse(event: &Event) -> Option<Reaction<()>> {
        if event.kind != kinds::TEXT_NOTE {
            return None;
        }
        Some(Reaction {
            target: reply_target(event)?.to_string(),
            key: event.id.clone(),
            actor: event.pubkey.clone(),
            value: (),
        })
    }

    fn draft(target: &str, content: String, author: &str) -> UnsignedEvent {
        UnsignedEvent::new(kinds::TEXT_NOTE, content, author).tag(["e", target, "", "reply"])
    }

    fn aggregate(entries: &Entries<()>) -> HashSet<Uid> {
        entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(tags: &[&[&str]]) -> Event {
        Event {
            id: "ee".repeat(32),
            pubkey: "ff".repeat(32),
            created_at: 1,
            kind: kinds::TEXT_NOTE,
            tags: tags
                .iter()
                .map(|t| t.iter().map(|s| s.to_string()).collect())
                .collect(),
            content: "hi".into(),
            sig: String::new(),
        }
    }

    #[test]
    fn reply_marker_wins_over_root() {
        let n = note(&[&["e", "root", "", "root"], &["e", "parent", "", "reply"]]);
        assert_eq!(reply_target(&n), Some("parent"));
    }

    #[test]
    fn root_marker_for_direct_replies() {
        let n = note(&[&["e", "root", "wss://r", "root"], &["p", "x"]]);
        assert_eq!(reply_target(&n), Some("root"));
    }

    #[test]
    fn unmarked_tags_use_the_last_one() {
        let n = note(&[&["e", "root"], &["e", "parent"]]);
        assert_eq!(reply_target(&n), Some("parent"));
    }

    #[test]
    fn mentions_are_not_reply_targets() {
        let quote = note(&[&["e", "quoted", "", "mention"]]);
        assert!(Replies::parse(&quote).is_none());

        let n = note(&[&["e", "parent"], &["e", "quoted", "", "mention"]]);
        assert_eq!(reply_target(&n), Some("parent"));
    }

    #[test]
    fn plain_note_is_not_a_reply() {
        assert!(Replies::parse(&note(&[&["p", "someone"]])).is_none());
    }

    #[test]
    fn key_is_the_reply_itself() {
        let r = Replies::parse(&note(&[&["e", "t"]])).unwrap();
        assert_eq!(r.key, "ee".repeat(32));
        assert_eq!(r.target, "t");
    }
}
