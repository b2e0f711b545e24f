mod error;
mod mutations;
mod queries;
mod reconcile;

pub use error::EngineError;
pub use queries::watch_availability;
pub use reconcile::{Anomaly, ReconcileReport};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::grid::SlotGrid;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

// ── Group-commit WAL channel ─────────────────────────────

/// One command = one atomic batch: all events in an `Append` hit the disk
/// in a single flush, so a ledger write and its mirror commit together (or
/// tear only at a crash boundary, which replay + reconciliation absorb).
pub(super) enum WalCommand {
    Append {
        events: Vec<Event>,
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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    let n_events: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(n_events as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    'outer: for (events, _) in batch.iter() {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                append_err = Some(e);
                break 'outer;
            }
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The booking scheduler and its consistency engine: the reservation
/// ledger, the occupancy mirror, and the blackout registry, all behind one
/// WAL. One studio, one timeline.
pub struct Engine {
    grid: SlotGrid,
    days: DashMap<NaiveDate, SharedDayState>,
    /// More than one entry per date is a replayable anomaly, repaired
    /// keep-earliest by reconciliation. Live `block_date` refuses duplicates.
    blackouts: DashMap<NaiveDate, Vec<BlackoutDate>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → date, for id-only operations.
    reservation_to_date: DashMap<Ulid, NaiveDate>,
}

/// Apply an event directly to a DayState (no locking — caller holds the
/// lock). Missing targets are tolerated: replay of a diverged log must not
/// fail, and reconciliation repairs what it finds.
fn apply_to_day(day: &mut DayState, event: &Event) {
    match event {
        Event::ReservationCreated { reservation } => {
            day.reservations.insert(reservation.id, reservation.clone());
        }
        Event::ReservationStatusChanged { id, status, reason, .. } => {
            if let Some(r) = day.reservations.get_mut(id) {
                r.status = *status;
                if reason.is_some() {
                    r.rejection_reason = reason.clone();
                }
            }
        }
        Event::ReservationRepriced { id, pricing, .. } => {
            if let Some(r) = day.reservations.get_mut(id) {
                r.pricing = pricing.clone();
            }
        }
        Event::ReservationDeleted { id, .. } => {
            day.reservations.remove(id);
        }
        Event::OccupancyWritten { entry } => {
            day.occupancy.insert(entry.id, entry.clone());
        }
        Event::OccupancyStatusChanged { id, status, .. } => {
            if let Some(e) = day.occupancy.get_mut(id) {
                e.status = *status;
            }
        }
        Event::OccupancyRemoved { id, .. } => {
            day.occupancy.remove(id);
        }
        // Blackout events live at the engine level, not in day state
        Event::DateBlocked { .. } | Event::DateUnblocked { .. } => {}
    }
}

impl Engine {
    /// Open the engine, replaying the WAL at `wal_path` into memory.
    pub fn new(wal_path: PathBuf, grid: SlotGrid, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            grid,
            days: DashMap::new(),
            blackouts: DashMap::new(),
            wal_tx,
            notify,
            reservation_to_date: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this may run inside an async context.
        for event in &events {
            match event {
                Event::DateBlocked { date, reason, created_at } => {
                    engine.blackouts.entry(*date).or_default().push(BlackoutDate {
                        date: *date,
                        reason: reason.clone(),
                        created_at: *created_at,
                    });
                }
                Event::DateUnblocked { date } => {
                    engine.blackouts.remove(date);
                }
                other => {
                    let day = engine.day(other.date());
                    let mut guard = day.try_write().expect("replay: uncontended write");
                    apply_to_day(&mut guard, other);
                    engine.index_event(other);
                }
            }
        }

        Ok(engine)
    }

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    /// Get or lazily create the day entry for `date`.
    pub(super) fn day(&self, date: NaiveDate) -> SharedDayState {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    pub fn get_day(&self, date: &NaiveDate) -> Option<SharedDayState> {
        self.days.get(date).map(|e| e.value().clone())
    }

    /// Date a reservation id belongs to, if the ledger knows it.
    pub fn date_of(&self, id: &Ulid) -> Option<NaiveDate> {
        self.reservation_to_date.get(id).map(|e| *e.value())
    }

    /// All dates with any recorded state. Sweep input.
    pub fn known_dates(&self) -> Vec<NaiveDate> {
        self.days.iter().map(|e| *e.key()).collect()
    }

    /// Snapshot of every ledger id. The notifier uses this to resynchronize
    /// its identifier-set watermark after broadcast lag.
    pub fn ledger_ids(&self) -> Vec<Ulid> {
        self.reservation_to_date.iter().map(|e| *e.key()).collect()
    }

    pub(super) fn blackouts_for(&self, date: &NaiveDate) -> Option<Vec<BlackoutDate>> {
        self.blackouts.get(date).map(|e| e.value().clone())
    }

    /// Earliest blackout entry for the date, if any.
    pub fn blackout_on(&self, date: &NaiveDate) -> Option<BlackoutDate> {
        self.blackouts.get(date).and_then(|e| {
            e.value()
                .iter()
                .min_by_key(|b| b.created_at)
                .cloned()
        })
    }

    pub fn blackouts(&self) -> Vec<BlackoutDate> {
        let mut all: Vec<BlackoutDate> = self
            .blackouts
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        all.sort_by_key(|b| (b.date, b.created_at));
        all
    }

    pub(super) fn set_blackouts(&self, date: NaiveDate, entries: Vec<BlackoutDate>) {
        if entries.is_empty() {
            self.blackouts.remove(&date);
        } else {
            self.blackouts.insert(date, entries);
        }
    }

    /// Maintain the id → date index for ledger events.
    fn index_event(&self, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                self.reservation_to_date.insert(reservation.id, reservation.date);
            }
            Event::ReservationDeleted { id, .. } => {
                self.reservation_to_date.remove(id);
            }
            _ => {}
        }
    }

    /// Write an event batch to the WAL via the background group-commit
    /// writer. The batch is durable (or failed) as a unit.
    pub(super) async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    /// WAL-append + apply + notify in one call. Events commit as one batch;
    /// application and notification happen only after the flush succeeds.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DayState,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        self.wal_append(events.clone()).await?;
        for event in &events {
            apply_to_day(day, event);
            self.index_event(event);
            self.notify.send(event);
        }
        Ok(())
    }

    /// Lookup id → date, get the day, acquire its write lock.
    pub(super) async fn resolve_day_write(
        &self,
        id: &Ulid,
    ) -> Result<(NaiveDate, tokio::sync::OwnedRwLockWriteGuard<DayState>), EngineError> {
        let date = self.date_of(id).ok_or(EngineError::NotFound(*id))?;
        let day = self.get_day(&date).ok_or(EngineError::NotFound(*id))?;
        let guard = day.write_owned().await;
        Ok((date, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Deterministic order: blackouts first,
    /// then days ascending, reservations by creation time, mirrors by id.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for blackout in self.blackouts() {
            events.push(Event::DateBlocked {
                date: blackout.date,
                reason: blackout.reason,
                created_at: blackout.created_at,
            });
        }

        let mut dates = self.known_dates();
        dates.sort();
        for date in dates {
            let Some(day) = self.get_day(&date) else { continue };
            let guard = day.try_read().expect("compact: uncontended read");

            let mut reservations: Vec<&Reservation> = guard.reservations.values().collect();
            reservations.sort_by_key(|r| (r.created_at, r.id));
            for r in reservations {
                events.push(Event::ReservationCreated {
                    reservation: r.clone(),
                });
            }

            let mut mirrors: Vec<&OccupancyEntry> = guard.occupancy.values().collect();
            mirrors.sort_by_key(|e| e.id);
            for entry in mirrors {
                events.push(Event::OccupancyWritten { entry: entry.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))
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
