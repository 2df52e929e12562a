//! Trust assertions: parsing them out of events and drafting new ones.
//!
//! A trust assertion is an event of kind
//! [`TRUST_ASSERTION`](crate::types::kinds::TRUST_ASSERTION) with exactly one
//! target tag (`p` for a key, `r` for an item), a value tag `v` holding `1`,
//! `0` or `-1`, and optionally an `entity` tag restating the target type.
//!
//! Anyone on the network can publish these, so every structural problem is a
//! typed [`AssertionError`] and callers are expected to drop the event, not
//! fail.

use thiserror::Error;

use crate::types::{kinds, EntityType, Event, TrustValue, UnsignedEvent};
use crate::validation::is_hex_key;

#[derive(Debug, Error, PartialEq)]
pub enum AssertionError {
    #[error("event kind {0} is not a trust assertion")]
    WrongKind(u32),

    #[error("assertion has no target tag")]
    MissingTarget,

    #[error("assertion has more than one target tag")]
    AmbiguousTarget,

    #[error("assertion targets its own author")]
    SelfAssertion,

    #[error("assertion has no value tag")]
    MissingValue,

    #[error("{0}")]
    InvalidValue(String),

    #[error("declared entity type {declared} does not match {tagged} target tag")]
    EntityMismatch {
        declared: EntityType,
        tagged: EntityType,
    },

    #[error("key target is not a valid public key: {0:?}")]
    InvalidKeyTarget(String),
}

/// A decoded trust assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAssertion {
    pub author: String,
    pub target: String,
    pub entity_type: EntityType,
    pub value: TrustValue,
    pub created_at: u64,
}

impl TrustAssertion {
    /// Decode and check an assertion event.
    pub fn from_event(event: &Event) -> Result<Self, AssertionError> {
        if event.kind != kinds::TRUST_ASSERTION {
            return Err(AssertionError::WrongKind(event.kind));
        }

        let mut targets = event
            .tag_values("p")
            .map(|t| (EntityType::Key, t))
            .chain(event.tag_values("r").map(|t| (EntityType::Item, t)));
        let (entity_type, target) = targets.next().ok_or(AssertionError::MissingTarget)?;
        if targets.next().is_some() {
            return Err(AssertionError::AmbiguousTarget);
        }

        if let Some(declared) = event.first_tag("entity") {
            let declared: EntityType = declared.parse().map_err(AssertionError::InvalidValue)?;
            if declared != entity_type {
                return Err(AssertionError::EntityMismatch {
                    declared,
                    tagged: entity_type,
                });
            }
        }

        if entity_type == EntityType::Key && !is_hex_key(target) {
            return Err(AssertionError::InvalidKeyTarget(target.to_string()));
        }

        if target == event.pubkey {
            return Err(AssertionError::SelfAssertion);
        }

        let value: TrustValue = event
            .first_tag("v")
            .ok_or(AssertionError::MissingValue)?
            .parse()
            .map_err(AssertionError::InvalidValue)?;

        Ok(Self {
            author: event.pubkey.clone(),
            target: target.to_string(),
            entity_type,
            value,
            created_at: event.created_at,
        })
    }
}

/// Build an unsigned assertion by `author` about `target`.
pub fn draft_assertion(
    author: &str,
    target: &str,
    value: TrustValue,
    entity_type: EntityType,
) -> UnsignedEvent {
    let target_tag = match entity_type {
        EntityType::Key => "p",
        EntityType::Item => "r",
    };
    UnsignedEvent::new(kinds::TRUST_ASSERTION, "", author)
        .tag([target_tag, target])
        .tag(["v".to_string(), value.to_string()])
        .tag(["entity".to_string(), entity_type.to_string()])
}
