use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::types::Event;

/// How far into the future an event's `created_at` may lie.
///
/// A far-future timestamp would win every last-write-wins merge forever.
pub const MAX_CLOCK_SKEW_SECS: u64 = 15 * 60;

/// Errors returned when an [`Event`] is structurally unusable.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("id must be 64 lowercase hex characters, got: {0:?}")]
    InvalidId(String),

    #[error("pubkey must be 64 lowercase hex characters, got: {0:?}")]
    InvalidPubkey(String),

    #[error("tag at index {0} is empty")]
    EmptyTag(usize),

    #[error("created_at {0} is too far in the future")]
    FutureTimestamp(u64),
}

/// Validate the structure of an [`Event`] against the current clock.
///
/// Returns the first [`ValidationError`] found, checking fields in wire
/// order. Signatures are not checked here.
pub fn validate_event(event: &Event) -> Result<(), ValidationError> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    validate_event_at(event, now)
}

/// As [`validate_event`], with an explicit "now" in unix seconds.
pub fn validate_event_at(event: &Event, now: u64) -> Result<(), ValidationError> {
    if !is_hex_key(&event.id) {
        return Err(ValidationError::InvalidId(event.id.clone()));
    }

    if !is_hex_key(&event.pubkey) {
        return Err(ValidationError::InvalidPubkey(event.pubkey.clone()));
    }

    if event.created_at > now.saturating_add(MAX_CLOCK_SKEW_SECS) {
        return Err(ValidationError::FutureTimestamp(event.created_at));
    }

    for (i, tag) in event.tags.iter().enumerate() {
        if tag.first().map_or(true, |name| name.is_empty()) {
            return Err(ValidationError::EmptyTag(i));
        }
    }

    Ok(())
}

/// Whether `s` looks like a 32-byte key or id in lowercase hex.
pub fn is_hex_key(s: &str) -> bool {
    HEX_KEY_RE.is_match(s)
}

/// `^[0-9a-f]{64}$`
static HEX_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("invalid hex key regex"));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::kinds;

    const NOW: u64 = 1_700_000_000;

    fn valid() -> Event {
        Event {
            id: "0f".repeat(32),
            pubkey: "a1".repeat(32),
            created_at: NOW,
            kind: kinds::TEXT_NOTE,
            tags: vec![vec!["e".into(), "1f".repeat(32)]],
            content: "hello".into(),
            sig: String::new(),
        }
    }

    #[test]
    fn valid_event_passes() {
        assert_eq!(validate_event_at(&valid(), NOW), Ok(()));
    }

    #[test]
    fn uppercase_id_rejected() {
        let mut e = valid();
        e.id = "0F".repeat(32);
        assert!(matches!(validate_event_at(&e, NOW), Err(ValidationError::InvalidId(_))));
    }

    #[test]
    fn short_pubkey_rejected() {
        let mut e = valid();
        e.pubkey = "abc".into();
        assert!(matches!(
            validate_event_at(&e, NOW),
            Err(ValidationError::InvalidPubkey(_))
        ));
    }

    #[test]
    fn empty_tag_rejected() {
        let mut e = valid();
        e.tags.push(vec![]);
        assert_eq!(validate_event_at(&e, NOW), Err(ValidationError::EmptyTag(1)));
    }

    #[test]
    fn far_future_rejected() {
        let mut e = valid();
        e.created_at = NOW + MAX_CLOCK_SKEW_SECS + 1;
        assert!(matches!(
            validate_event_at(&e, NOW),
            Err(ValidationError::FutureTimestamp(_))
        ));
        e.created_at = NOW + MAX_CLOCK_SKEW_SECS;
        assert_eq!(validate_event_at(&e, NOW), Ok(()));
    }
}
