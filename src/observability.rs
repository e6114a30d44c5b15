use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;
use tracing_subscriber::EnvFilter;

use crate::engine::EngineError;
use crate::model::BookingStatus;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings accepted into a calendar. Labels: status.
pub const BOOKINGS_PLACED_TOTAL: &str = "slotgrid_bookings_placed_total";

/// Counter: booking placements, confirmations and moves refused. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "slotgrid_bookings_rejected_total";

/// Histogram: latency of a multi-day slot query in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "slotgrid_slot_query_duration_seconds";

/// Counter: committed rule-set edits (replace, exceptions, bulk ops).
pub const RULE_SET_UPDATES_TOTAL: &str = "slotgrid_rule_set_updates_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotgrid_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotgrid_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`. Safe to call twice;
/// only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Map an error to a short label for metrics.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::NotFound(_) => "not_found",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::InvalidInterval { .. } => "invalid_interval",
        EngineError::UnsortedOrOverlappingIntervals { .. } => "overlapping_intervals",
        EngineError::InvalidGranularity(_) => "invalid_granularity",
        EngineError::InvalidTimezone(_) => "invalid_timezone",
        EngineError::SlotUnavailable { .. } => "slot_unavailable",
        EngineError::FormatNotOffered { .. } => "format_not_offered",
        EngineError::DayInactive(_) => "day_inactive",
        EngineError::StaleAvailability { .. } => "stale_availability",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::VersionConflict { .. } => "version_conflict",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::WalError(_) => "wal_error",
        EngineError::MetricsExporter(_) => "metrics_exporter",
    }
}

pub fn status_label(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Request => "request",
        BookingStatus::Waiting => "waiting",
        BookingStatus::Confirmed => "confirmed",
        BookingStatus::Finalized => "finalized",
        BookingStatus::Declined => "declined",
    }
}
