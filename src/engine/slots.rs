use chrono::NaiveDate;

use crate::limits::MAX_INTERVALS_PER_DAY;
use crate::model::*;

use super::EngineError;

// ── Slot Grid ─────────────────────────────────────────────────────

/// Expand a day rule into consecutive `granularity`-minute slots.
///
/// Only whole slots are emitted; a tail shorter than `granularity` at the
/// end of an interval is dropped. Each slot carries its interval's formats.
/// Intervals are processed in start order whatever order they were given in.
pub fn generate_slots(
    rule: &DayRule,
    date: NaiveDate,
    granularity: Minutes,
) -> Result<Vec<BookableSlot>, EngineError> {
    check_granularity(granularity)?;
    if !rule.is_active {
        return Ok(Vec::new());
    }

    let mut slots = Vec::new();
    for interval in sorted_intervals(&rule.intervals)? {
        let end = interval.end.minutes();
        let mut start = interval.start.minutes();
        while start + granularity <= end {
            slots.push(BookableSlot {
                date,
                start: TimeOfDay(start),
                end: TimeOfDay(start + granularity),
                formats: interval.formats.clone(),
            });
            start += granularity;
        }
    }
    Ok(slots)
}

pub(crate) fn check_granularity(granularity: Minutes) -> Result<(), EngineError> {
    if granularity == 0 || granularity > MINUTES_PER_DAY {
        return Err(EngineError::InvalidGranularity(granularity));
    }
    Ok(())
}

/// Validate every interval and return them ordered by start.
///
/// `start >= end` is an [`EngineError::InvalidInterval`]; two intervals
/// sharing any time (equal starts included) are
/// [`EngineError::UnsortedOrOverlappingIntervals`]. Touching intervals are fine.
pub fn sorted_intervals(intervals: &[Interval]) -> Result<Vec<&Interval>, EngineError> {
    for i in intervals {
        if i.start >= i.end {
            return Err(EngineError::InvalidInterval {
                start: i.start.minutes(),
                end: i.end.minutes(),
            });
        }
    }

    let mut sorted: Vec<&Interval> = intervals.iter().collect();
    sorted.sort_by_key(|i| i.start);

    for pair in sorted.windows(2) {
        if pair[0].span().overlaps(&pair[1].span()) {
            return Err(EngineError::UnsortedOrOverlappingIntervals {
                first: pair[0].span(),
                second: pair[1].span(),
            });
        }
    }
    Ok(sorted)
}

/// Write-time form of a day rule: intervals validated and sorted by start.
/// Inactive rules are checked too, since they may be switched back on.
pub fn normalize_day_rule(rule: &DayRule) -> Result<DayRule, EngineError> {
    if rule.intervals.len() > MAX_INTERVALS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many intervals in one day"));
    }
    let intervals = sorted_intervals(&rule.intervals)?
        .into_iter()
        .cloned()
        .collect();
    Ok(DayRule {
        is_active: rule.is_active,
        intervals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> TimeOfDay {
        TimeOfDay::from_hm(h, m).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn starts(slots: &[BookableSlot]) -> Vec<String> {
        slots.iter().map(|s| s.start.to_string()).collect()
    }

    #[test]
    fn morning_rule_yields_six_half_hour_slots() {
        let rule = DayRule::open(vec![Interval::new(t(9, 0), t(12, 0), [Format::Video])]);
        let slots = generate_slots(&rule, date(), 30).unwrap();
        assert_eq!(
            starts(&slots),
            vec!["09:00", "09:30", "10:00", "10:30", "11:00", "11:30"]
        );
        for s in &slots {
            assert_eq!(s.date, date());
            assert_eq!(s.span().duration_minutes(), 30);
            assert_eq!(s.formats, FormatSet::from([Format::Video]));
        }
        assert_eq!(slots.last().unwrap().end, t(12, 0));
    }

    #[test]
    fn inactive_rule_yields_nothing_even_with_intervals() {
        let rule = DayRule {
            is_active: false,
            intervals: vec![Interval::new(t(9, 0), t(12, 0), [Format::Video])],
        };
        assert!(generate_slots(&rule, date(), 30).unwrap().is_empty());
    }

    #[test]
    fn inactive_rule_skips_interval_validation() {
        let rule = DayRule {
            is_active: false,
            intervals: vec![Interval::new(t(12, 0), t(9, 0), [Format::Video])],
        };
        assert!(generate_slots(&rule, date(), 30).unwrap().is_empty());
    }

    #[test]
    fn partial_tail_is_dropped() {
        let rule = DayRule::open(vec![Interval::new(t(9, 0), t(10, 45), [Format::Video])]);
        let slots = generate_slots(&rule, date(), 30).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "09:30", "10:00"]);
    }

    #[test]
    fn interval_shorter_than_granularity_yields_nothing() {
        let rule = DayRule::open(vec![Interval::new(t(9, 0), t(9, 20), [Format::Video])]);
        assert!(generate_slots(&rule, date(), 30).unwrap().is_empty());
    }

    #[test]
    fn unsorted_intervals_are_sorted_first() {
        let rule = DayRule::open(vec![
            Interval::new(t(14, 0), t(15, 0), [Format::InPerson]),
            Interval::new(t(9, 0), t(10, 0), [Format::Video]),
        ]);
        let slots = generate_slots(&rule, date(), 30).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "09:30", "14:00", "14:30"]);
        assert!(slots[0].offers(Format::Video));
        assert!(slots[2].offers(Format::InPerson));
        assert!(!slots[2].offers(Format::Video));
    }

    #[test]
    fn multi_format_interval_slots_offer_both() {
        let rule = DayRule::open(vec![Interval::new(
            t(9, 0),
            t(9, 30),
            [Format::Video, Format::InPerson],
        )]);
        let slots = generate_slots(&rule, date(), 30).unwrap();
        assert_eq!(slots.len(), 1);
        assert!(slots[0].offers(Format::Video) && slots[0].offers(Format::InPerson));
    }

    #[test]
    fn equal_starts_rejected() {
        let rule = DayRule::open(vec![
            Interval::new(t(9, 0), t(10, 0), [Format::Video]),
            Interval::new(t(9, 0), t(11, 0), [Format::InPerson]),
        ]);
        let err = generate_slots(&rule, date(), 30).unwrap_err();
        assert!(matches!(err, EngineError::UnsortedOrOverlappingIntervals { .. }));
    }

    #[test]
    fn overlapping_intervals_rejected() {
        let rule = DayRule::open(vec![
            Interval::new(t(9, 0), t(11, 0), [Format::Video]),
            Interval::new(t(10, 30), t(12, 0), [Format::Video]),
        ]);
        assert!(matches!(
            generate_slots(&rule, date(), 30),
            Err(EngineError::UnsortedOrOverlappingIntervals { .. })
        ));
    }

    #[test]
    fn touching_intervals_allowed() {
        let rule = DayRule::open(vec![
            Interval::new(t(9, 0), t(10, 0), [Format::Video]),
            Interval::new(t(10, 0), t(11, 0), [Format::InPerson]),
        ]);
        assert_eq!(generate_slots(&rule, date(), 60).unwrap().len(), 2);
    }

    #[test]
    fn backwards_interval_rejected() {
        let rule = DayRule::open(vec![Interval::new(t(12, 0), t(9, 0), [Format::Video])]);
        assert_eq!(
            generate_slots(&rule, date(), 30),
            Err(EngineError::InvalidInterval { start: 720, end: 540 })
        );
        let empty = DayRule::open(vec![Interval::new(t(9, 0), t(9, 0), [Format::Video])]);
        assert!(matches!(
            generate_slots(&empty, date(), 30),
            Err(EngineError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn granularity_bounds() {
        let rule = DayRule::open(vec![Interval::new(t(9, 0), t(10, 0), [Format::Video])]);
        assert_eq!(generate_slots(&rule, date(), 0), Err(EngineError::InvalidGranularity(0)));
        assert_eq!(
            generate_slots(&rule, date(), 1441),
            Err(EngineError::InvalidGranularity(1441))
        );
        assert_eq!(generate_slots(&rule, date(), 15).unwrap().len(), 4);
    }

    #[test]
    fn full_day_interval_reaches_midnight() {
        let rule = DayRule::open(vec![Interval::new(
            TimeOfDay::MIDNIGHT,
            TimeOfDay::END_OF_DAY,
            [Format::Video],
        )]);
        let slots = generate_slots(&rule, date(), 60).unwrap();
        assert_eq!(slots.len(), 24);
        assert_eq!(slots.last().unwrap().end, TimeOfDay::END_OF_DAY);
    }

    #[test]
    fn generation_is_deterministic() {
        let rule = DayRule::open(vec![
            Interval::new(t(13, 0), t(17, 0), [Format::InPerson]),
            Interval::new(t(8, 0), t(12, 0), [Format::Video, Format::InPerson]),
        ]);
        let a = generate_slots(&rule, date(), 20).unwrap();
        let b = generate_slots(&rule, date(), 20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_sorts_and_keeps_flag() {
        let rule = DayRule {
            is_active: false,
            intervals: vec![
                Interval::new(t(14, 0), t(15, 0), [Format::Video]),
                Interval::new(t(9, 0), t(10, 0), [Format::Video]),
            ],
        };
        let normalized = normalize_day_rule(&rule).unwrap();
        assert!(!normalized.is_active);
        assert_eq!(normalized.intervals[0].start, t(9, 0));
        assert_eq!(normalized.intervals[1].start, t(14, 0));
    }

    #[test]
    fn normalize_rejects_overlap_on_inactive_day() {
        let rule = DayRule {
            is_active: false,
            intervals: vec![
                Interval::new(t(9, 0), t(11, 0), [Format::Video]),
                Interval::new(t(10, 0), t(12, 0), [Format::Video]),
            ],
        };
        assert!(matches!(
            normalize_day_rule(&rule),
            Err(EngineError::UnsortedOrOverlappingIntervals { .. })
        ));
    }
}
