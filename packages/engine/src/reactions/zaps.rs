//! Zaps: lightning payment receipts (kind 9735).
//!
//! A receipt points at the zapped event with its first `e` tag and embeds the
//! zap request (kind 9734) as JSON in its `description` tag. Entries are keyed
//! by the request id, so the receipt for a zap we sent replaces the optimistic
//! entry created from our own request instead of counting twice.
//!
//! Only receipts are requested from relays. Requests are parsed for local
//! submissions only; a request is not proof of payment.

use std::collections::HashSet;

use trustmesh::{kinds, Event, Uid, UnsignedEvent};

use super::{Entries, Reaction, ReactionKind};

pub struct Zaps;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapDraft {
    pub amount_msats: u64,
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZapTotals {
    pub total_msats: u64,
    pub count: usize,
    pub zappers: HashSet<Uid>,
}

fn amount(event: &Event) -> Option<u64> {
    event
        .first_tag("amount")
        .and_then(|a| a.parse().ok())
        .filter(|a| *a > 0)
}

fn parse_request(event: &Event) -> Option<Reaction<u64>> {
    Some(Reaction {
        target: event.first_tag("e")?.to_string(),
        key: event.id.clone(),
        actor: event.pubkey.clone(),
        value: amount(event)?,
    })
}

fn parse_receipt(event: &Event) -> Option<Reaction<u64>> {
    let target = event.first_tag("e")?;
    let request: Option<Event> = event
        .first_tag("description")
        .and_then(|d| serde_json::from_str(d).ok());

    let zapper = event
        .first_tag("P")
        .map(str::to_string)
        .or_else(|| request.as_ref().map(|r| r.pubkey.clone()))?;
    let msats = amount(event).or_else(|| request.as_ref().and_then(amount))?;
    let key = request.map_or_else(|| event.id.clone(), |r| r.id);

    Some(Reaction {
        target: target.to_string(),
        key,
        actor: zapper,
        value: msats,
    })
}

impl ReactionKind for Zaps {
    const NAME: &'static str = "zaps";
    const KINDS: &'static [u32] = &[kinds::ZAP_RECEIPT];
    const AWAITS_TARGET: bool = false;

    /// Millisatoshis.
    type Value = u64;
    type Draft = ZapDraft;
    type Aggregate = ZapTotals;

    fn parse(event: &Event) -> Option<Reaction<u64>> {
        match event.kind {
            kinds::ZAP_RECEIPT => parse_receipt(event),
            kinds::ZAP_REQUEST => parse_request(event),
            _ => None,
        }
    }

    fn draft(target: &str, draft: ZapDraft, author: &str) -> UnsignedEvent {
        UnsignedEvent::new(kinds::ZAP_REQUEST, draft.comment, author)
            .tag(["e", target])
            .tag(["amount".to_string(), draft.amount_msats.to_string()])
    }

    fn aggregate(entries: &Entries<u64>) -> ZapTotals {
        entries.values().fold(ZapTotals::default(), |mut totals, e| {
            totals.total_msats = totals.total_msats.saturating_add(e.value.value);
            totals.count += 1;
            totals.zappers.insert(e.value.actor);
            totals
        })
    }
}
