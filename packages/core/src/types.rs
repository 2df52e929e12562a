//! Core data types for relay-delivered events.
//!
//! This module defines the wire-format structures the rest of the crate
//! works on: [`Event`], [`UnsignedEvent`], [`EntityType`] and [`TrustValue`],
//! plus the well-known event [`kinds`]. Events serialise to and from JSON as
//! the relays deliver them.

use serde::{Deserialize, Serialize};

/// Well-known event kinds.
pub mod kinds {
    /// Short text note. A note with an `e` tag is a reply.
    pub const TEXT_NOTE: u32 = 1;
    /// Repost of a text note.
    pub const REPOST: u32 = 6;
    /// Reaction (like, or `-` to retract a like).
    pub const REACTION: u32 = 7;
    /// Repost of an event of any kind.
    pub const GENERIC_REPOST: u32 = 16;
    /// Zap request, created by the payer before the payment.
    pub const ZAP_REQUEST: u32 = 9734;
    /// Zap receipt, published by the recipient's payment service.
    pub const ZAP_RECEIPT: u32 = 9735;
    /// Trust assertion about a key or an item.
    pub const TRUST_ASSERTION: u32 = 30382;
}

/// A signed, immutable event as delivered by a relay.
///
/// `id` and `pubkey` are 64-char lowercase hex. `sig` is empty for events the
/// caller has not signed yet; signature checking is left to the ingestion
/// layer that feeds this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sig: String,
}

impl Event {
    /// All tags whose name is `name`, in order of appearance.
    pub fn tags_named<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a [String]> + use<'a, 'n> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .map(Vec::as_slice)
    }

    /// The first value of every tag named `name`.
    pub fn tag_values<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.tags_named(name)
            .filter_map(|t| t.get(1).map(String::as_str))
    }

    /// Value of the first tag named `name`.
    pub fn first_tag(&self, name: &str) -> Option<&str> {
        self.tag_values(name).next()
    }

    /// Value of the last tag named `name`.
    pub fn last_tag(&self, name: &str) -> Option<&str> {
        self.tag_values(name).last()
    }
}

/// An event that has not been given an id or signature yet.
///
/// Built by the trust service and the reaction indices, then handed to a
/// [`Signer`](crate::signing::Signer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    /// Create a draft stamped with the current UTC time.
    pub fn new(kind: u32, content: impl Into<String>, pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            created_at: chrono::Utc::now().timestamp().max(0) as u64,
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a tag.
    pub fn tag<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(parts.into_iter().map(Into::into).collect());
        self
    }

    /// Override the timestamp (tests, replays).
    pub fn at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// What a trust assertion is about.
///
/// Serialises as a lowercase string (`"key"` / `"item"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A public-key identity.
    Key,
    /// Anything else that can be named by a string, e.g. a URL.
    Item,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Key => write!(f, "key"),
            EntityType::Item => write!(f, "item"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "key" => Ok(EntityType::Key),
            "item" => Ok(EntityType::Item),
            _ => Err(format!("unknown entity type {s:?}; expected one of: key, item")),
        }
    }
}

/// The polarity of a trust assertion.
///
/// `Neutral` retracts an earlier opinion: the edge is kept but contributes
/// nothing to scores. Serialises as the integer `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "i8", into = "i8")]
pub enum TrustValue {
    Distrust,
    Neutral,
    Trust,
}

impl TrustValue {
    pub fn as_i8(self) -> i8 {
        match self {
            TrustValue::Distrust => -1,
            TrustValue::Neutral => 0,
            TrustValue::Trust => 1,
        }
    }
}

impl TryFrom<i8> for TrustValue {
    type Error = String;
    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(TrustValue::Distrust),
            0 => Ok(TrustValue::Neutral),
            1 => Ok(TrustValue::Trust),
            other => Err(format!("trust value must be -1, 0 or 1, got {other}")),
        }
    }
}

impl From<TrustValue> for i8 {
    fn from(v: TrustValue) -> Self {
        v.as_i8()
    }
}

impl std::fmt::Display for TrustValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

/// Parses `"1"`, `"+1"`, `"0"` or `"-1"`.
impl std::str::FromStr for TrustValue {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: i8 = s
            .trim_start_matches('+')
            .parse()
            .map_err(|_| format!("trust value must be -1, 0 or 1, got {s:?}"))?;
        TrustValue::try_from(n)
    }
}
