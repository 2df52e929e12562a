//! Relay query filters.
//!
//! A [`Filter`] describes which events a live or historical query asks for.
//! All set-valued fields use `BTreeSet` so two filters built in a different
//! order compare and hash equal, which lets the subscription coordinator use
//! the filter itself as its query key.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::Event;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ids: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub authors: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub kinds: BTreeSet<u32>,

    /// Events carrying an `e` tag with one of these values.
    #[serde(default, rename = "#e", skip_serializing_if = "BTreeSet::is_empty")]
    pub event_refs: BTreeSet<String>,

    /// Events carrying a `p` tag with one of these values.
    #[serde(default, rename = "#p", skip_serializing_if = "BTreeSet::is_empty")]
    pub pubkey_refs: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn authors<S: Into<String>>(mut self, authors: impl IntoIterator<Item = S>) -> Self {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn event_refs<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.event_refs.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn pubkey_refs<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.pubkey_refs.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies every constraint of this filter.
    ///
    /// `limit` is a hint for the relay and is not checked here.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&event.id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.event_refs.is_empty()
            && !event.tag_values("e").any(|v| self.event_refs.contains(v))
        {
            return false;
        }
        if !self.pubkey_refs.is_empty()
            && !event.tag_values("p").any(|v| self.pubkey_refs.contains(v))
        {
            return false;
        }
        if self.since.is_some_and(|s| event.created_at < s) {
            return false;
        }
        if self.until.is_some_and(|u| event.created_at > u) {
            return false;
        }
        true
    }
}
