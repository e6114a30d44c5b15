use chrono::Weekday;

use crate::model::*;

/// Copy `source`'s intervals onto every other weekday that is active.
/// Inactive weekdays, the source itself and all exceptions are left alone.
pub fn repeat_to_all_active_days(rule_set: &AvailabilityRuleSet, source: Weekday) -> AvailabilityRuleSet {
    let intervals = &rule_set.weekly.get(source).intervals;
    let mut next = rule_set.clone();
    for day in WEEKDAYS {
        if day == source {
            continue;
        }
        let rule = next.weekly.get_mut(day);
        if rule.is_active {
            rule.intervals = intervals.clone();
        }
    }
    next
}

/// Close `day` and drop its intervals. Exceptions on dates falling on that
/// weekday still apply.
pub fn clear_day(rule_set: &AvailabilityRuleSet, day: Weekday) -> AvailabilityRuleSet {
    let mut next = rule_set.clone();
    next.weekly.set(day, DayRule::closed());
    next
}
