use chrono::NaiveDate;

use crate::model::*;

// ── Availability Resolution ───────────────────────────────────────

/// Effective day rule for `date`.
///
/// An exception for the date wins outright, even a closed one; there is no
/// merging with the weekly rule. Otherwise the weekly rule for the date's
/// weekday applies. Weekdays never configured are closed.
pub fn resolve(rule_set: &AvailabilityRuleSet, date: NaiveDate) -> DayRule {
    match rule_set.exceptions.get(date) {
        Some(exception) => exception.clone(),
        None => rule_set.weekly.get(weekday_of(date)).clone(),
    }
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// True if `span` intersects any of the disjoint, sorted `busy` spans.
pub fn intersects_any(busy: &[Span], span: &Span) -> bool {
    // Everything at index >= right_bound starts at or after span.end → can't overlap.
    let right_bound = busy.partition_point(|b| b.start < span.end);
    busy[..right_bound].last().is_some_and(|b| b.end > span.start)
}
