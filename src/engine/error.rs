use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, Format, Minutes, Span, TimeOfDay};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Start not before end, or a range running past midnight. Raw minutes
    /// so out-of-day ends can be reported.
    InvalidInterval {
        start: Minutes,
        end: Minutes,
    },
    UnsortedOrOverlappingIntervals {
        first: Span,
        second: Span,
    },
    InvalidGranularity(Minutes),
    InvalidTimezone(String),
    SlotUnavailable {
        date: NaiveDate,
        start: TimeOfDay,
    },
    FormatNotOffered {
        format: Format,
        at: TimeOfDay,
    },
    DayInactive(NaiveDate),
    /// The slot was free in the caller's snapshot but got taken before commit.
    StaleAvailability {
        date: NaiveDate,
        start: TimeOfDay,
    },
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    VersionConflict {
        expected: u64,
        actual: u64,
    },
    LimitExceeded(&'static str),
    WalError(String),
    /// The Prometheus exporter could not be installed.
    MetricsExporter(String),
}

fn hhmm(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{}, {})", hhmm(*start), hhmm(*end))
            }
            EngineError::UnsortedOrOverlappingIntervals { first, second } => {
                write!(f, "intervals {first} and {second} overlap")
            }
            EngineError::InvalidGranularity(g) => {
                write!(f, "slot granularity must be 1..=1440 minutes, got {g}")
            }
            EngineError::InvalidTimezone(tz) => write!(f, "unknown timezone: {tz:?}"),
            EngineError::SlotUnavailable { date, start } => {
                write!(f, "slot {date} {start} is not available")
            }
            EngineError::FormatNotOffered { format, at } => {
                write!(f, "format {format} is not offered at {at}")
            }
            EngineError::DayInactive(date) => write!(f, "specialist is not working on {date}"),
            EngineError::StaleAvailability { date, start } => {
                write!(f, "slot {date} {start} was just taken")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id} cannot move from {from} to {to}")
            }
            EngineError::VersionConflict { expected, actual } => {
                write!(f, "rule set version conflict: expected {expected}, current {actual}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::MetricsExporter(e) => write!(f, "metrics exporter: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}
