mod availability;
mod bulk;
mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;

pub use availability::{intersects_any, merge_overlapping, resolve};
pub use bulk::{clear_day, repeat_to_all_active_days};
pub use conflict::{
    available_slots, validate_booking, validate_booking_as_of, validate_reschedule, validate_reschedule_as_of,
    Placement,
};
pub use error::EngineError;
pub use mutations::normalize_rule_set;
pub use slots::{generate_slots, normalize_day_rule, sorted_intervals};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<Calendar>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// wait for one append, drain whatever else is already queued, then fsync
/// once for the whole batch and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compaction or stats see the file.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Owns every specialist calendar. Rule and booking writes go WAL-first,
/// then into memory, then out to subscribers.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedCalendar>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → specialist id
    pub(super) booking_to_specialist: DashMap<Ulid, Ulid>,
    pub(super) granularity: Minutes,
    /// Serializes specialist creation against compaction so a new calendar
    /// can't slip between the snapshot and the file swap.
    pub(super) registry_lock: Mutex<()>,
}

/// Apply an event directly to a Calendar. The caller holds the lock.
fn apply_to_calendar(cal: &mut Calendar, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RuleSetReplaced { rule_set, version, .. } => {
            cal.rule_set = rule_set.clone();
            cal.rule_version = *version;
        }
        Event::BookingPlaced {
            booking,
            calendar_version,
        } => {
            index.insert(booking.id, booking.specialist_id);
            cal.insert_booking(booking.clone());
            cal.calendar_version = *calendar_version;
        }
        Event::BookingStatusChanged {
            id,
            status,
            calendar_version,
            ..
        } => {
            if let Some(b) = cal.booking_mut(*id) {
                if status.blocks() && !b.status.blocks() {
                    b.slot_version = *calendar_version;
                }
                b.status = *status;
            }
            cal.calendar_version = *calendar_version;
        }
        Event::BookingRescheduled {
            id,
            date,
            start,
            end,
            calendar_version,
            ..
        } => {
            if let Some(mut b) = cal.remove_booking(*id) {
                b.date = *date;
                b.start = *start;
                b.end = *end;
                b.slot_version = *calendar_version;
                cal.insert_booking(b);
            }
            cal.calendar_version = *calendar_version;
        }
        Event::CalendarSnapshot { calendar } => {
            for b in &calendar.bookings {
                index.insert(b.id, calendar.id);
            }
            *cal = calendar.clone();
        }
        // Creation is handled at the DashMap level, not here
        Event::SpecialistCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, granularity: Minutes) -> Result<Self, EngineError> {
        slots::check_granularity(granularity)?;
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_to_specialist: DashMap::new(),
            granularity,
            registry_lock: Mutex::new(()),
        };

        // We are the sole owner of these Arcs during replay, so try_write never
        // contends. Never block here: this may run inside an async context.
        let mut skipped = 0usize;
        for event in &events {
            let id = event.specialist_id();
            match event {
                Event::SpecialistCreated { id, rule_set } => {
                    let cal = Calendar::new(*id, rule_set.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(cal)));
                }
                Event::CalendarSnapshot { calendar } => {
                    let cal = Calendar::new(calendar.id, calendar.rule_set.clone());
                    let shared = Arc::new(RwLock::new(cal));
                    if let Ok(mut guard) = shared.try_write() {
                        apply_to_calendar(&mut guard, event, &engine.booking_to_specialist);
                    }
                    engine.state.insert(calendar.id, shared);
                }
                other => match engine.state.get(&id).map(|e| e.value().clone()) {
                    Some(shared) => {
                        if let Ok(mut guard) = shared.try_write() {
                            apply_to_calendar(&mut guard, other, &engine.booking_to_specialist);
                        }
                    }
                    None => skipped += 1,
                },
            }
        }
        if skipped > 0 {
            warn!("WAL replay skipped {skipped} events for unknown specialists");
        }
        info!(
            "replayed {} events: {} specialists, {} bookings",
            events.len(),
            engine.state.len(),
            engine.booking_to_specialist.len()
        );

        Ok(engine)
    }

    /// Process-level startup: logging, the metrics endpoint when a port is
    /// configured, the data directory, the engine on its WAL and the compactor.
    pub fn open(config: &Config) -> Result<Arc<Self>, EngineError> {
        observability::init_tracing();
        observability::init(config.metrics_port).map_err(|e| EngineError::MetricsExporter(e.to_string()))?;
        std::fs::create_dir_all(&config.data_dir)?;
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Self::new(config.wal_path(), notify, config.granularity_minutes)?);

        let compactor_engine = engine.clone();
        let threshold = config.compact_threshold;
        let every = config.compact_interval;
        tokio::spawn(async move {
            crate::compactor::run_compactor(compactor_engine, threshold, every).await;
        });

        Ok(engine)
    }

    pub fn granularity(&self) -> Minutes {
        self.granularity
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_calendar(&self, id: &Ulid) -> Option<SharedCalendar> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_specialist_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_specialist.get(booking_id).map(|e| *e.value())
    }

    pub(super) fn calendar(&self, id: &Ulid) -> Result<SharedCalendar, EngineError> {
        self.get_calendar(id).ok_or(EngineError::NotFound(*id))
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(&self, cal: &mut Calendar, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_calendar(cal, event, &self.booking_to_specialist);
        self.notify.send(cal.id, event);
        Ok(())
    }

    /// Lookup booking → specialist, acquire that calendar's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<Calendar>, EngineError> {
        let specialist_id = self
            .get_specialist_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let cal = self.calendar(&specialist_id)?;
        Ok(cal.write_owned().await)
    }
}
