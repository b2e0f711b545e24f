use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{broadcast, watch};
use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    /// Availability view for one date: `Blocked` everywhere under a
    /// blackout, else `Occupied` where an active reservation resolves to
    /// the slot, else `Open`. Snapshot read; advisory at display time —
    /// `create_reservation` re-validates under the write lock.
    pub async fn day_availability(&self, date: NaiveDate) -> DayAvailability {
        let n = self.grid().len();
        if let Some(blackout) = self.blackout_on(&date) {
            return DayAvailability {
                date,
                blackout: Some(blackout.reason),
                slots: vec![SlotState::Blocked; n],
            };
        }

        let mut slots = vec![SlotState::Open; n];
        if let Some(day) = self.get_day(&date) {
            let guard = day.read().await;
            for r in guard.reservations.values() {
                if r.is_active()
                    && let Some(idx) = r.slot
                    && idx < n
                {
                    slots[idx] = SlotState::Occupied;
                }
            }
        }
        DayAvailability {
            date,
            blackout: None,
            slots,
        }
    }

    /// All ledger records for a date, resolved slots first in grid order,
    /// unresolved ones trailing by creation time.
    pub async fn reservations_on(&self, date: NaiveDate) -> Vec<Reservation> {
        let Some(day) = self.get_day(&date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        let mut all: Vec<Reservation> = guard.reservations.values().cloned().collect();
        all.sort_by_key(|r| (r.slot.unwrap_or(usize::MAX), r.created_at, r.id));
        all
    }

    /// Mirror entries for a date. Mostly useful for reconciliation checks
    /// and tests; booking paths read the mirror under the day lock instead.
    pub async fn occupancy_on(&self, date: NaiveDate) -> Vec<OccupancyEntry> {
        let Some(day) = self.get_day(&date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        let mut all: Vec<OccupancyEntry> = guard.occupancy.values().cloned().collect();
        all.sort_by_key(|e| (e.slot.unwrap_or(usize::MAX), e.id));
        all
    }

    /// Active reservations whose time label never resolved to a slot —
    /// the manual-reconciliation queue.
    pub async fn unresolved_on(&self, date: NaiveDate) -> Vec<Reservation> {
        let Some(day) = self.get_day(&date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        let mut flagged: Vec<Reservation> = guard
            .reservations
            .values()
            .filter(|r| r.slot.is_none() && r.is_active())
            .cloned()
            .collect();
        flagged.sort_by_key(|r| (r.created_at, r.id));
        flagged
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let date = self.date_of(id)?;
        let day = self.get_day(&date)?;
        let guard = day.read().await;
        guard.reservations.get(id).cloned()
    }
}

/// Push-driven availability feed for one date: recomputes on every
/// committed change for the date and publishes into a watch channel. The
/// task exits when the last receiver is dropped.
pub async fn watch_availability(
    engine: Arc<Engine>,
    date: NaiveDate,
) -> watch::Receiver<DayAvailability> {
    // Subscribe before the initial snapshot so no committed change can fall
    // between the snapshot and the feed.
    let mut feed = engine.notify.subscribe(date);
    let initial = engine.day_availability(date).await;
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tx.closed() => break,
                msg = feed.recv() => match msg {
                    // Lag just means we recompute from fresher state
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let view = engine.day_availability(date).await;
                        if tx.send(view).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    rx
}
