use chrono::NaiveDate;
use ulid::Ulid;

use crate::layout::slots_occupied;
use crate::model::*;

use super::availability::{intersects_any, merge_overlapping, resolve};
use super::slots::generate_slots;
use super::EngineError;

/// Where an accepted booking lands: its time range and the grid slots it consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub slots: Vec<BookableSlot>,
}

impl Placement {
    pub fn slots_occupied(&self) -> u32 {
        self.slots.len() as u32
    }
}

fn blocking<'a>(
    specialist_id: Ulid,
    date: NaiveDate,
    bookings: &'a [Booking],
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a Booking> {
    bookings.iter().filter(move |b| {
        b.specialist_id == specialist_id
            && b.date == date
            && b.status.blocks()
            && Some(b.id) != exclude
    })
}

/// Disjoint, sorted spans consumed on `date` by `specialist_id`'s blocking
/// bookings.
fn busy_spans(specialist_id: Ulid, date: NaiveDate, bookings: &[Booking]) -> Vec<Span> {
    let mut busy: Vec<Span> = blocking(specialist_id, date, bookings, None)
        .map(|b| b.span())
        .collect();
    busy.sort_by_key(|s| s.start);
    merge_overlapping(&busy)
}

/// Drop every candidate consumed by a waiting, confirmed or finalized
/// booking of the same specialist on `date`. With `format` set, slots not
/// offering it are dropped too. Candidates for other dates are not returned.
pub fn available_slots(
    specialist_id: Ulid,
    date: NaiveDate,
    format: Option<Format>,
    existing: &[Booking],
    candidates: &[BookableSlot],
) -> Vec<BookableSlot> {
    let busy = busy_spans(specialist_id, date, existing);
    candidates
        .iter()
        .filter(|slot| slot.date == date)
        .filter(|slot| format.is_none_or(|f| slot.offers(f)))
        .filter(|slot| !intersects_any(&busy, &slot.span()))
        .cloned()
        .collect()
}

/// Check a new booking against the specialist's rules and existing bookings.
///
/// The request must start on a grid slot, and the `ceil(duration / granularity)`
/// slots from there must be back to back, all offer the format and all
/// still be free.
pub fn validate_booking(
    request: &BookingRequest,
    rule_set: &AvailabilityRuleSet,
    existing: &[Booking],
    granularity: Minutes,
) -> Result<Placement, EngineError> {
    validate_booking_as_of(request, rule_set, existing, granularity, None)
}

/// [`validate_booking`] for a caller whose slot list was computed at
/// calendar version `observed`. A slot taken by a booking that got it after
/// `observed` is reported as [`EngineError::StaleAvailability`]. Slots that
/// were already taken at `observed`, or were never on the grid, stay
/// [`EngineError::SlotUnavailable`].
pub fn validate_booking_as_of(
    request: &BookingRequest,
    rule_set: &AvailabilityRuleSet,
    existing: &[Booking],
    granularity: Minutes,
    observed: Option<u64>,
) -> Result<Placement, EngineError> {
    check_placement(
        Candidate {
            specialist_id: request.specialist_id,
            date: request.date,
            start: request.start,
            duration: request.duration,
            format: request.format,
        },
        rule_set,
        existing,
        granularity,
        None,
        observed,
    )
}

/// Check moving `booking` to `date`/`start` as if it were new, with its
/// current slots released. Terminal bookings can't move.
pub fn validate_reschedule(
    booking: &Booking,
    date: NaiveDate,
    start: TimeOfDay,
    rule_set: &AvailabilityRuleSet,
    existing: &[Booking],
    granularity: Minutes,
) -> Result<Placement, EngineError> {
    validate_reschedule_as_of(booking, date, start, rule_set, existing, granularity, None)
}

/// [`validate_reschedule`] with the same staleness rule as
/// [`validate_booking_as_of`].
pub fn validate_reschedule_as_of(
    booking: &Booking,
    date: NaiveDate,
    start: TimeOfDay,
    rule_set: &AvailabilityRuleSet,
    existing: &[Booking],
    granularity: Minutes,
    observed: Option<u64>,
) -> Result<Placement, EngineError> {
    if booking.status.is_terminal() {
        return Err(EngineError::InvalidTransition {
            id: booking.id,
            from: booking.status,
            to: booking.status,
        });
    }
    check_placement(
        Candidate {
            date,
            start,
            ..Candidate::of(booking)
        },
        rule_set,
        existing,
        granularity,
        Some(booking.id),
        observed,
    )
}

/// Confirming a request turns it into a blocking booking, so it has to pass
/// placement again against today's rules: the day may have been closed, and
/// another blocking booking may have taken the time since the request was
/// accepted (reported as [`EngineError::StaleAvailability`]).
pub(crate) fn check_still_free(
    booking: &Booking,
    rule_set: &AvailabilityRuleSet,
    existing: &[Booking],
    granularity: Minutes,
) -> Result<(), EngineError> {
    check_placement(
        Candidate::of(booking),
        rule_set,
        existing,
        granularity,
        Some(booking.id),
        Some(booking.slot_version),
    )
    .map(|_| ())
}

/// What is being placed, independent of whether it is a new request or a
/// booking on the move.
struct Candidate {
    specialist_id: Ulid,
    date: NaiveDate,
    start: TimeOfDay,
    duration: Minutes,
    format: Format,
}

impl Candidate {
    fn of(booking: &Booking) -> Self {
        Self {
            specialist_id: booking.specialist_id,
            date: booking.date,
            start: booking.start,
            duration: booking.duration,
            format: booking.format,
        }
    }
}

fn check_placement(
    candidate: Candidate,
    rule_set: &AvailabilityRuleSet,
    existing: &[Booking],
    granularity: Minutes,
    exclude: Option<Ulid>,
    observed: Option<u64>,
) -> Result<Placement, EngineError> {
    let Candidate {
        specialist_id,
        date,
        start,
        duration,
        format,
    } = candidate;
    let end = match start.checked_add(duration) {
        Some(end) if duration > 0 => end,
        _ => {
            return Err(EngineError::InvalidInterval {
                start: start.minutes(),
                end: start.minutes().saturating_add(duration),
            });
        }
    };

    let rule = resolve(rule_set, date);
    if !rule.is_active {
        return Err(EngineError::DayInactive(date));
    }
    let grid = generate_slots(&rule, date, granularity)?;

    let unavailable = EngineError::SlotUnavailable { date, start };
    let first = grid
        .iter()
        .position(|s| s.start == start)
        .ok_or_else(|| unavailable.clone())?;
    let needed = slots_occupied(duration, granularity) as usize;
    let run = grid
        .get(first..first + needed)
        .ok_or_else(|| unavailable.clone())?;

    // A gap between intervals breaks the run even if both sides exist.
    if run.windows(2).any(|pair| pair[0].end != pair[1].start) {
        return Err(unavailable);
    }
    if let Some(slot) = run.iter().find(|s| !s.offers(format)) {
        return Err(EngineError::FormatNotOffered {
            format,
            at: slot.start,
        });
    }

    let clashes: Vec<&Booking> = blocking(specialist_id, date, existing, exclude)
        .filter(|b| run.iter().any(|s| s.span().overlaps(&b.span())))
        .collect();
    if !clashes.is_empty() {
        let taken_since = observed.is_some_and(|v| clashes.iter().any(|b| b.slot_version > v));
        return Err(if taken_since {
            EngineError::StaleAvailability { date, start }
        } else {
            unavailable
        });
    }

    Ok(Placement {
        date,
        start,
        end,
        slots: run.to_vec(),
    })
}
