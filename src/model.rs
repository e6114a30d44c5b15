use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since local midnight, the only time-of-day unit.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Monday-first, the order used to index [`WeeklyRules`].
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// How a session is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Video,
    InPerson,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Video => f.write_str("video"),
            Format::InPerson => f.write_str("in_person"),
        }
    }
}

pub type FormatSet = BTreeSet<Format>;

// ── Time of day ──────────────────────────────────────────────────

/// Wall-clock time without a date, in the specialist's timezone.
/// `24:00` is valid so a range can run to the end of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(pub(crate) Minutes);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(MINUTES_PER_DAY);

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour.checked_mul(60)?.checked_add(minute)?)
    }

    pub fn from_minutes(minutes: Minutes) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn minutes(self) -> Minutes {
        self.0
    }

    pub fn hour(self) -> u32 {
        self.0 / 60
    }

    pub fn minute(self) -> u32 {
        self.0 % 60
    }

    /// `None` when the result would pass the end of the day.
    pub fn checked_add(self, minutes: Minutes) -> Option<Self> {
        Self::from_minutes(self.0.checked_add(minutes)?)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day {:?}, expected HH:MM", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let hour: u32 = h.parse().map_err(|_| err())?;
        let minute: u32 = m.parse().map_err(|_| err())?;
        Self::from_hm(hour, minute).ok_or_else(err)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ParseTimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Half-open day-local range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Span {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minutes {
        self.end.0 - self.start.0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ── Availability rules ───────────────────────────────────────────

/// A bookable window within one day and the formats offered in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub formats: FormatSet,
}

impl Interval {
    pub fn new(start: TimeOfDay, end: TimeOfDay, formats: impl IntoIterator<Item = Format>) -> Self {
        Self {
            start,
            end,
            formats: formats.into_iter().collect(),
        }
    }

    /// Only meaningful once `start < end` has been checked.
    pub fn span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
        }
    }
}

/// Bookability of one weekday or one exception date. The default is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRule {
    pub is_active: bool,
    pub intervals: Vec<Interval>,
}

impl DayRule {
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn open(intervals: Vec<Interval>) -> Self {
        Self {
            is_active: true,
            intervals,
        }
    }
}

/// Seven day rules indexed by weekday.
///
/// Serialized as a weekday-keyed map (`{"Mon": {...}}`); weekdays missing
/// from the map come back closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<Weekday, DayRule>", into = "HashMap<Weekday, DayRule>")]
pub struct WeeklyRules {
    days: [DayRule; 7],
}

impl WeeklyRules {
    pub fn from_entries(entries: impl IntoIterator<Item = (Weekday, DayRule)>) -> Self {
        let mut weekly = Self::default();
        for (day, rule) in entries {
            weekly.set(day, rule);
        }
        weekly
    }

    pub fn get(&self, day: Weekday) -> &DayRule {
        &self.days[day.num_days_from_monday() as usize]
    }

    pub fn get_mut(&mut self, day: Weekday) -> &mut DayRule {
        &mut self.days[day.num_days_from_monday() as usize]
    }

    pub fn set(&mut self, day: Weekday, rule: DayRule) {
        *self.get_mut(day) = rule;
    }

    /// Monday first.
    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &DayRule)> {
        WEEKDAYS.into_iter().zip(self.days.iter())
    }
}

impl From<HashMap<Weekday, DayRule>> for WeeklyRules {
    fn from(map: HashMap<Weekday, DayRule>) -> Self {
        Self::from_entries(map)
    }
}

impl From<WeeklyRules> for HashMap<Weekday, DayRule> {
    fn from(weekly: WeeklyRules) -> Self {
        WEEKDAYS.into_iter().zip(weekly.days).collect()
    }
}

/// A day rule pinned to one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    pub date: NaiveDate,
    pub rule: DayRule,
}

/// Date overrides keyed by date. Serialized as a list of [`Exception`];
/// a later entry for the same date replaces an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Exception>", into = "Vec<Exception>")]
pub struct Exceptions {
    by_date: BTreeMap<NaiveDate, DayRule>,
}

impl Exceptions {
    pub fn get(&self, date: NaiveDate) -> Option<&DayRule> {
        self.by_date.get(&date)
    }

    pub fn insert(&mut self, date: NaiveDate, rule: DayRule) -> Option<DayRule> {
        self.by_date.insert(date, rule)
    }

    pub fn remove(&mut self, date: NaiveDate) -> Option<DayRule> {
        self.by_date.remove(&date)
    }

    pub fn len(&self) -> usize {
        self.by_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    /// Ordered by date.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, &DayRule)> {
        self.by_date.iter().map(|(d, r)| (*d, r))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&NaiveDate, &mut DayRule)> {
        self.by_date.iter_mut()
    }
}

impl From<Vec<Exception>> for Exceptions {
    fn from(list: Vec<Exception>) -> Self {
        Self {
            by_date: list.into_iter().map(|e| (e.date, e.rule)).collect(),
        }
    }
}

impl From<Exceptions> for Vec<Exception> {
    fn from(exceptions: Exceptions) -> Self {
        exceptions
            .by_date
            .into_iter()
            .map(|(date, rule)| Exception { date, rule })
            .collect()
    }
}

/// A specialist's complete availability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRuleSet {
    /// IANA name, e.g. `Europe/Berlin`. All times of day are local to it.
    pub timezone: String,
    #[serde(default)]
    pub weekly: WeeklyRules,
    #[serde(default)]
    pub exceptions: Exceptions,
}

impl AvailabilityRuleSet {
    /// All days closed, no exceptions.
    pub fn new(timezone: impl Into<String>) -> Self {
        Self {
            timezone: timezone.into(),
            weekly: WeeklyRules::default(),
            exceptions: Exceptions::default(),
        }
    }

    pub fn with_day(mut self, day: Weekday, rule: DayRule) -> Self {
        self.weekly.set(day, rule);
        self
    }

    pub fn with_exception(mut self, date: NaiveDate, rule: DayRule) -> Self {
        self.exceptions.insert(date, rule);
        self
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Client asked; the specialist has not answered.
    Request,
    /// Specialist holds the slot until the client confirms.
    Waiting,
    Confirmed,
    Finalized,
    Declined,
}

impl BookingStatus {
    /// Whether a booking in this status consumes its slots.
    pub fn blocks(self) -> bool {
        matches!(
            self,
            BookingStatus::Waiting | BookingStatus::Confirmed | BookingStatus::Finalized
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Finalized | BookingStatus::Declined)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Request | Waiting, Confirmed | Declined) | (Confirmed, Finalized | Declined)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Request => "request",
            BookingStatus::Waiting => "waiting",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Finalized => "finalized",
            BookingStatus::Declined => "declined",
        };
        f.write_str(s)
    }
}

/// What the calendar UI submits when a client (or the specialist) picks a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub specialist_id: Ulid,
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    /// Session length in minutes.
    pub duration: Minutes,
    pub format: Format,
    /// Minor currency units.
    #[serde(default)]
    pub price: u64,
    #[serde(default)]
    pub is_repeat: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub specialist_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub duration: Minutes,
    pub format: Format,
    pub status: BookingStatus,
    pub price: u64,
    pub is_repeat: bool,
    /// Calendar version at which the booking last took its slots: when it
    /// was placed, moved, or started blocking.
    pub slot_version: u64,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
        }
    }

    pub fn slots_occupied(&self, granularity: Minutes) -> u32 {
        crate::layout::slots_occupied(self.duration, granularity)
    }
}

/// A candidate time a client may book. Computed per query, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookableSlot {
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub formats: FormatSet,
}

impl BookableSlot {
    pub fn span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
        }
    }

    pub fn offers(&self, format: Format) -> bool {
        self.formats.contains(&format)
    }
}

// ── Per-specialist state ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: Ulid,
    pub rule_set: AvailabilityRuleSet,
    /// Bumped on every rule-set write; writers must present the current one.
    pub rule_version: u64,
    /// Bumped on every booking mutation.
    pub calendar_version: u64,
    /// All bookings, sorted by `(date, start)`.
    pub bookings: Vec<Booking>,
}

impl Calendar {
    pub fn new(id: Ulid, rule_set: AvailabilityRuleSet) -> Self {
        Self {
            id,
            rule_set,
            rule_version: 1,
            calendar_version: 0,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by `(date, start)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.start);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.date, b.start))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings on `date`, any status.
    pub fn on_date(&self, date: NaiveDate) -> &[Booking] {
        self.between(date, date)
    }

    /// Bookings with `from <= date <= to`.
    pub fn between(&self, from: NaiveDate, to: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < from);
        let hi = self.bookings.partition_point(|b| b.date <= to);
        &self.bookings[lo..hi.max(lo)]
    }
}

/// Everything that changes a calendar. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpecialistCreated {
        id: Ulid,
        rule_set: AvailabilityRuleSet,
    },
    RuleSetReplaced {
        specialist_id: Ulid,
        rule_set: AvailabilityRuleSet,
        version: u64,
    },
    BookingPlaced {
        booking: Booking,
        calendar_version: u64,
    },
    BookingStatusChanged {
        id: Ulid,
        specialist_id: Ulid,
        status: BookingStatus,
        calendar_version: u64,
    },
    BookingRescheduled {
        id: Ulid,
        specialist_id: Ulid,
        date: NaiveDate,
        start: TimeOfDay,
        end: TimeOfDay,
        calendar_version: u64,
    },
    /// Whole-calendar image written by WAL compaction.
    CalendarSnapshot {
        calendar: Calendar,
    },
}

impl Event {
    pub fn specialist_id(&self) -> Ulid {
        match self {
            Event::SpecialistCreated { id, .. } => *id,
            Event::RuleSetReplaced { specialist_id, .. }
            | Event::BookingStatusChanged { specialist_id, .. }
            | Event::BookingRescheduled { specialist_id, .. } => *specialist_id,
            Event::BookingPlaced { booking, .. } => booking.specialist_id,
            Event::CalendarSnapshot { calendar } => calendar.id,
        }
    }
}

/// Calendar-day weekday helper so callers don't need `chrono::Datelike` in scope.
pub fn weekday_of(date: NaiveDate) -> Weekday {
    date.weekday()
}
