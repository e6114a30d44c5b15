use std::sync::Arc;

use chrono::{NaiveDate, Weekday};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::bulk;
use super::conflict::{check_still_free, validate_booking_as_of, validate_reschedule_as_of};
use super::slots::normalize_day_rule;
use super::{Engine, EngineError, WalCommand};

/// Write-time validation of a whole rule set: known timezone, every day
/// rule (weekly and exception) with valid, non-overlapping intervals, which
/// come back sorted by start.
pub fn normalize_rule_set(mut rule_set: AvailabilityRuleSet) -> Result<AvailabilityRuleSet, EngineError> {
    if rule_set.timezone.len() > MAX_TIMEZONE_LEN {
        return Err(EngineError::LimitExceeded("timezone name too long"));
    }
    if rule_set.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(EngineError::InvalidTimezone(rule_set.timezone));
    }
    if rule_set.exceptions.len() > MAX_EXCEPTIONS {
        return Err(EngineError::LimitExceeded("too many exceptions"));
    }
    for day in WEEKDAYS {
        let normalized = normalize_day_rule(rule_set.weekly.get(day))?;
        rule_set.weekly.set(day, normalized);
    }
    for (_, rule) in rule_set.exceptions.iter_mut() {
        *rule = normalize_day_rule(rule)?;
    }
    Ok(rule_set)
}

fn rejected(e: EngineError) -> EngineError {
    metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => observability::error_label(&e))
        .increment(1);
    debug!("booking rejected: {e}");
    e
}

impl Engine {
    pub async fn create_specialist(&self, id: Ulid, rule_set: AvailabilityRuleSet) -> Result<(), EngineError> {
        let rule_set = normalize_rule_set(rule_set)?;
        let _registry = self.registry_lock.lock().await;
        if self.state.len() >= MAX_SPECIALISTS {
            return Err(EngineError::LimitExceeded("too many specialists"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::SpecialistCreated {
            id,
            rule_set: rule_set.clone(),
        };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(Calendar::new(id, rule_set))));
        self.notify.send(id, &event);
        info!("specialist {id} created");
        Ok(())
    }

    // ── Rule set edits ───────────────────────────────────────

    /// Versioned read-modify-write of a rule set. The edit only lands if the
    /// stored version still equals `expected_version`; returns the new version.
    async fn edit_rule_set<F>(&self, id: Ulid, expected_version: u64, edit: F) -> Result<u64, EngineError>
    where
        F: FnOnce(&AvailabilityRuleSet) -> AvailabilityRuleSet,
    {
        let cal = self.calendar(&id)?;
        let mut guard = cal.write().await;
        if guard.rule_version != expected_version {
            return Err(EngineError::VersionConflict {
                expected: expected_version,
                actual: guard.rule_version,
            });
        }

        let rule_set = normalize_rule_set(edit(&guard.rule_set))?;
        let version = guard.rule_version + 1;
        let event = Event::RuleSetReplaced {
            specialist_id: id,
            rule_set,
            version,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RULE_SET_UPDATES_TOTAL).increment(1);
        debug!("specialist {id} rule set now at version {version}");
        Ok(version)
    }

    pub async fn replace_rule_set(
        &self,
        id: Ulid,
        rule_set: AvailabilityRuleSet,
        expected_version: u64,
    ) -> Result<u64, EngineError> {
        self.edit_rule_set(id, expected_version, |_| rule_set).await
    }

    pub async fn set_exception(
        &self,
        id: Ulid,
        date: NaiveDate,
        rule: DayRule,
        expected_version: u64,
    ) -> Result<u64, EngineError> {
        self.edit_rule_set(id, expected_version, |current| {
            current.clone().with_exception(date, rule)
        })
        .await
    }

    pub async fn remove_exception(&self, id: Ulid, date: NaiveDate, expected_version: u64) -> Result<u64, EngineError> {
        self.edit_rule_set(id, expected_version, |current| {
            let mut next = current.clone();
            next.exceptions.remove(date);
            next
        })
        .await
    }

    pub async fn repeat_to_all_active_days(
        &self,
        id: Ulid,
        source: Weekday,
        expected_version: u64,
    ) -> Result<u64, EngineError> {
        self.edit_rule_set(id, expected_version, |current| {
            bulk::repeat_to_all_active_days(current, source)
        })
        .await
    }

    pub async fn clear_day(&self, id: Ulid, day: Weekday, expected_version: u64) -> Result<u64, EngineError> {
        self.edit_rule_set(id, expected_version, |current| bulk::clear_day(current, day))
            .await
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Client-initiated booking; lands with status `Request`.
    ///
    /// `observed_version` is the `calendar_version` the client's slot list was
    /// computed from. A slot taken after that version is reported as
    /// [`EngineError::StaleAvailability`].
    pub async fn request_booking(
        &self,
        request: BookingRequest,
        observed_version: Option<u64>,
    ) -> Result<Booking, EngineError> {
        self.place_booking(request, BookingStatus::Request, observed_version)
            .await
    }

    /// Specialist-held slot pending client confirmation; lands as `Waiting`
    /// and blocks the slot immediately.
    pub async fn hold_slot(&self, request: BookingRequest, observed_version: Option<u64>) -> Result<Booking, EngineError> {
        self.place_booking(request, BookingStatus::Waiting, observed_version)
            .await
    }

    /// Check-and-insert under the calendar's write lock, so nothing can take
    /// the slot between validation and the WAL append.
    async fn place_booking(
        &self,
        request: BookingRequest,
        status: BookingStatus,
        observed_version: Option<u64>,
    ) -> Result<Booking, EngineError> {
        let cal = self.calendar(&request.specialist_id)?;
        let mut guard = cal.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPECIALIST {
            return Err(EngineError::LimitExceeded("too many bookings for specialist"));
        }

        let placement = validate_booking_as_of(
            &request,
            &guard.rule_set,
            &guard.bookings,
            self.granularity,
            observed_version,
        )
        .map_err(rejected)?;

        let version = guard.calendar_version + 1;
        let booking = Booking {
            id: Ulid::new(),
            specialist_id: request.specialist_id,
            client_id: request.client_id,
            service_id: request.service_id,
            date: placement.date,
            start: placement.start,
            end: placement.end,
            duration: request.duration,
            format: request.format,
            status,
            price: request.price,
            is_repeat: request.is_repeat,
            slot_version: version,
        };
        let event = Event::BookingPlaced {
            booking: booking.clone(),
            calendar_version: version,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::BOOKINGS_PLACED_TOTAL, "status" => observability::status_label(status))
            .increment(1);
        info!(
            "booking {} placed for specialist {} on {} at {} ({status})",
            booking.id, booking.specialist_id, booking.date, booking.start
        );
        Ok(booking)
    }

    async fn transition(&self, id: Ulid, to: BookingStatus) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if !booking.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id,
                from: booking.status,
                to,
            });
        }
        if to.blocks() && !booking.status.blocks() {
            check_still_free(&booking, &guard.rule_set, &guard.bookings, self.granularity).map_err(rejected)?;
        }

        let event = Event::BookingStatusChanged {
            id,
            specialist_id: booking.specialist_id,
            status: to,
            calendar_version: guard.calendar_version + 1,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("booking {id}: {} -> {to}", booking.status);
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// A request or held slot becomes confirmed. A request is placed again
    /// first: its day must still be open and its time still free.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Confirmed).await
    }

    pub async fn decline_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Declined).await
    }

    pub async fn finalize_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Finalized).await
    }

    /// Soft cancellation by either party: the booking stays on record as
    /// `Declined` and stops blocking its slots.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.transition(id, BookingStatus::Declined).await?;
        info!("booking {id} cancelled");
        Ok(booking)
    }

    /// Move a booking to a new date/time, all or nothing. On any rejection
    /// the booking keeps its current slots.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        date: NaiveDate,
        start: TimeOfDay,
        observed_version: Option<u64>,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;

        let placement = validate_reschedule_as_of(
            &booking,
            date,
            start,
            &guard.rule_set,
            &guard.bookings,
            self.granularity,
            observed_version,
        )
        .map_err(rejected)?;

        let event = Event::BookingRescheduled {
            id,
            specialist_id: booking.specialist_id,
            date: placement.date,
            start: placement.start,
            end: placement.end,
            calendar_version: guard.calendar_version + 1,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(
            "booking {id} moved from {} {} to {} {}",
            booking.date, booking.start, placement.date, placement.start
        );
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as one snapshot per calendar.
    ///
    /// Read locks on every calendar (and the registry lock) are held until
    /// the swap is done, so no write can land in the old file after its
    /// snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        let calendars: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(calendars.len());
        for cal in calendars {
            guards.push(cal.read_owned().await);
        }

        let events: Vec<Event> = guards
            .iter()
            .map(|g| Event::CalendarSnapshot {
                calendar: (**g).clone(),
            })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        drop(guards);
        info!("compacted WAL to {count} calendar snapshots");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
