//! Free-form time label → canonical slot index.
//!
//! Labels arrive from staff entry, customer forms, and spreadsheet imports
//! in heterogeneous shapes: `"9:00"`, `"09:00"`, `"9:00 AM"`,
//! `"9:00-9:30 am"`. Matching is deliberately tolerant; a label that
//! matches nothing is `None` (unresolved), which callers must treat as
//! needing manual reconciliation, never as a denial of service.

use crate::grid::SlotGrid;
use crate::limits::MAX_TIME_LABEL_LEN;

/// Resolve `raw` against the grid. Three tiers, each a full pass in slot
/// order: exact equality with the canonical start label, candidate inside
/// canonical, canonical inside candidate (tolerates missing meridiem).
/// First hit wins; earliest-slot preference within a tier is iteration
/// order, a heuristic rather than a guarantee.
pub fn match_slot(raw: &str, grid: &SlotGrid) -> Option<usize> {
    if raw.len() > MAX_TIME_LABEL_LEN {
        return None;
    }
    let candidate = normalize(raw);
    if candidate.is_empty() {
        return None;
    }

    let canonical: Vec<String> = grid
        .slots()
        .iter()
        .map(|s| normalize(&s.start_label()))
        .collect();

    if let Some(i) = canonical.iter().position(|c| *c == candidate) {
        return Some(i);
    }
    if let Some(i) = canonical.iter().position(|c| c.contains(&candidate)) {
        return Some(i);
    }
    canonical.iter().position(|c| candidate.contains(c.as_str()))
}

/// Case-fold, drop whitespace, keep only the start of a range, strip a
/// leading zero from the hour.
fn normalize(label: &str) -> String {
    let folded: String = label
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect();

    let start = folded
        .split(['-', '\u{2013}'])
        .next()
        .unwrap_or("")
        .to_string();

    let mut chars = start.chars();
    match (chars.next(), chars.clone().next()) {
        (Some('0'), Some(d)) if d.is_ascii_digit() => chars.as_str().to_string(),
        _ => start,
    }
}
