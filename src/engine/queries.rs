use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::resolve;
use super::conflict::available_slots;
use super::slots::generate_slots;
use super::{Engine, EngineError};

impl Engine {
    /// Bookable slots for every date in `from..=to`, in date then time order.
    ///
    /// Unknown specialists have no availability. An empty range (`to < from`)
    /// yields nothing.
    pub async fn available_slots(
        &self,
        specialist_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        format: Option<Format>,
    ) -> Result<Vec<BookableSlot>, EngineError> {
        if (to - from).num_days() >= MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let cal = match self.get_calendar(&specialist_id) {
            Some(cal) => cal,
            None => return Ok(vec![]),
        };
        let started = Instant::now();
        let guard = cal.read().await;

        let mut free = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let grid = generate_slots(&resolve(&guard.rule_set, date), date, self.granularity)?;
            if grid.is_empty() {
                continue;
            }
            free.extend(available_slots(
                specialist_id,
                date,
                format,
                guard.on_date(date),
                &grid,
            ));
        }

        metrics::histogram!(observability::SLOT_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(free)
    }

    /// The effective rule for one date after exceptions are applied.
    pub async fn day_rule(&self, specialist_id: Ulid, date: NaiveDate) -> Result<DayRule, EngineError> {
        let cal = self.calendar(&specialist_id)?;
        let guard = cal.read().await;
        Ok(resolve(&guard.rule_set, date))
    }

    /// Current rule set with the version a subsequent edit must present.
    pub async fn rule_set(&self, specialist_id: Ulid) -> Result<(AvailabilityRuleSet, u64), EngineError> {
        let cal = self.calendar(&specialist_id)?;
        let guard = cal.read().await;
        Ok((guard.rule_set.clone(), guard.rule_version))
    }

    pub async fn calendar_version(&self, specialist_id: Ulid) -> Result<u64, EngineError> {
        let cal = self.calendar(&specialist_id)?;
        let guard = cal.read().await;
        Ok(guard.calendar_version)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let specialist_id = self
            .get_specialist_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let cal = self.calendar(&specialist_id)?;
        let guard = cal.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every booking with `from <= date <= to`, declined ones included.
    pub async fn list_bookings(
        &self,
        specialist_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let cal = match self.get_calendar(&specialist_id) {
            Some(cal) => cal,
            None => return Ok(vec![]),
        };
        let guard = cal.read().await;
        Ok(guard.between(from, to).to_vec())
    }

    pub fn list_specialists(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}
