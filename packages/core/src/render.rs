//! Human-readable text rendering of trust scores and snapshots.
//!
//! The output is stable plain text for terminals and logs. It is not a
//! canonical format; only the JSON snapshot is.

use crate::graph::{Assessment, TrustGraph, TrustScore};
use crate::snapshot::GraphSnapshot;
use crate::types::TrustValue;

/// Render the score of `target` as seen from `viewer`.
///
/// ```text
/// Trust score for 3bf0c63f…
///              own  trusted  2nd
///   trust        0        2    1
///   distrust     0        0    1
///
/// Assessors:
///   +1  degree 1  82341f88…
///   -1  degree 2  fa984bd7…
/// ```
///
/// An empty score renders as "no signal", never as an error.
pub fn render_score(graph: &TrustGraph, target: &str, viewer: &str) -> String {
    let registry = graph.registry();
    let (Some(t), Some(v)) = (registry.lookup(target), registry.lookup(viewer)) else {
        return format!("Trust score for {}\n  no signal\n", short(target));
    };

    let score = graph.score_of(t, v);
    let mut out = format!("Trust score for {}\n", short(target));
    if score.is_empty() {
        out.push_str("  no signal\n");
        return out;
    }
    out.push_str(&render_table(&score));

    let assessments = graph.assessments(t, v);
    out.push('\n');
    out.push_str("Assessors:\n");
    for a in &assessments {
        out.push_str(&render_assessment(graph, a));
    }
    out
}

fn render_table(score: &TrustScore) -> String {
    let row = |label: &str, counts: &[u32]| {
        format!(
            "  {:<8} {:>4} {:>8} {:>4}\n",
            label, counts[0], counts[1], counts[2]
        )
    };
    let mut out = format!("  {:<8} {:>4} {:>8} {:>4}\n", "", "own", "trusted", "2nd");
    out.push_str(&row("trust", &score.trusts));
    out.push_str(&row("distrust", &score.distrusts));
    out
}

fn render_assessment(graph: &TrustGraph, a: &Assessment) -> String {
    let sign = match a.value {
        TrustValue::Trust => "+1",
        TrustValue::Distrust => "-1",
        TrustValue::Neutral => " 0",
    };
    let who = graph
        .registry()
        .resolve(a.assessor)
        .unwrap_or_else(|| a.assessor.to_string());
    format!("  {}  degree {}  {}\n", sign, a.degree, short(&who))
}

/// Render a summary of a graph snapshot.
///
/// ```text
/// Trust graph  3 edges
/// ────────────────────
///   trust     2
///   distrust  1
///   neutral   0
///   pending   1
/// ```
pub fn render_snapshot(snapshot: &GraphSnapshot) -> String {
    let total = snapshot.edges.len();
    let header = format!("Trust graph  {} edge{}", total, if total == 1 { "" } else { "s" });
    let rule = "─".repeat(header.chars().count());

    let count = |v: TrustValue| snapshot.edges.iter().filter(|e| e.value == v).count();
    let pending = snapshot
        .edges
        .iter()
        .filter(|e| e.provenance == crate::lww::Provenance::LocalPending)
        .count();

    let mut out = format!("{}\n{}\n", header, rule);
    if let Some(v) = &snapshot.viewer {
        out.push_str(&format!("  viewer    {}\n", short(v)));
    }
    out.push_str(&format!("  trust     {}\n", count(TrustValue::Trust)));
    out.push_str(&format!("  distrust  {}\n", count(TrustValue::Distrust)));
    out.push_str(&format!("  neutral   {}\n", count(TrustValue::Neutral)));
    out.push_str(&format!("  pending   {}\n", pending));
    out
}

/// First 8 characters of a long identifier, followed by an ellipsis.
fn short(s: &str) -> String {
    if s.chars().count() <= 12 {
        return s.to_string();
    }
    let head: String = s.chars().take(8).collect();
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;
    use crate::lww::Stamped;
    use crate::registry::Registry;
    use crate::types::EntityType;
    use std::sync::Arc;

    fn graph() -> TrustGraph {
        let registry = Arc::new(Registry::new());
        let mut g = TrustGraph::new(Arc::clone(&registry));
        let edge = |value| Edge {
            value,
            entity_type: EntityType::Key,
        };
        let (v, a, c) = (registry.intern("viewer"), registry.intern("a"), registry.intern("c"));
        g.set_viewer(v);
        g.apply_edge(v, a, Stamped::confirmed(edge(TrustValue::Trust), 1, registry.intern("1")));
        g.apply_edge(a, c, Stamped::confirmed(edge(TrustValue::Distrust), 1, registry.intern("2")));
        g
    }

    #[test]
    fn render_score_lists_assessors() {
        let out = render_score(&graph(), "c", "viewer");
        assert!(out.contains("Trust score for c"));
        assert!(out.contains("-1  degree 1  a"));
    }

    #[test]
    fn unknown_target_renders_no_signal() {
        let out = render_score(&graph(), "nobody", "viewer");
        assert!(out.contains("no signal"));
    }

    #[test]
    fn snapshot_summary_counts() {
        let out = render_snapshot(&graph().snapshot());
        assert!(out.starts_with("Trust graph  2 edges"));
        assert!(out.contains("trust     1"));
        assert!(out.contains("distrust  1"));
    }

    #[test]
    fn short_truncates_long_ids() {
        assert_eq!(short("abc"), "abc");
        assert_eq!(short(&"f".repeat(64)), "ffffffff…");
    }
}
