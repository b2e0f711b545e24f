//! Ledger ↔ mirror reconciliation.
//!
//! The dual write is best-effort across a crash boundary, so divergence is
//! expected, not exceptional. Repairs with an unambiguous resolution are
//! applied and persisted; everything else is escalated for a human.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_DATES_PER_SWEEP;
use crate::model::*;

use super::{Engine, EngineError};

/// A divergence with no unambiguous automatic repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Two or more active reservations resolved to the same slot. Repairing
    /// means cancelling someone's booking — a human decision.
    DoubleBooking {
        date: NaiveDate,
        slot: usize,
        ids: Vec<Ulid>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Mirror entries with no ledger record — deleted.
    pub dangling_removed: Vec<Ulid>,
    /// Active reservations missing their mirror — mirror recreated.
    pub mirrors_restored: Vec<Ulid>,
    /// Mirrors disagreeing with the ledger — overwritten from the ledger.
    pub drift_repaired: Vec<Ulid>,
    /// Duplicate blackout entries removed (keep-earliest).
    pub duplicate_blocks_trimmed: usize,
    /// Divergences needing a human.
    pub escalations: Vec<Anomaly>,
}

impl ReconcileReport {
    pub fn repairs(&self) -> usize {
        self.dangling_removed.len()
            + self.mirrors_restored.len()
            + self.drift_repaired.len()
            + self.duplicate_blocks_trimmed
    }

    pub fn is_clean(&self) -> bool {
        self.repairs() == 0 && self.escalations.is_empty()
    }
}

impl Engine {
    /// Diff the ledger against the occupancy mirror for each date and
    /// repair: dangling mirrors removed, missing mirrors recreated, drifted
    /// mirrors overwritten (the ledger is authoritative), duplicate
    /// blackouts trimmed keep-earliest. Repairs are WAL-persisted like any
    /// other write. Ambiguous states are reported, not touched.
    pub async fn reconcile(&self, dates: &[NaiveDate]) -> Result<ReconcileReport, EngineError> {
        if dates.len() > MAX_DATES_PER_SWEEP {
            return Err(EngineError::LimitExceeded("too many dates in one sweep"));
        }

        let mut report = ReconcileReport::default();
        for &date in dates {
            self.repair_duplicate_blackouts(date, &mut report).await?;
            self.reconcile_day(date, &mut report).await?;
        }

        if !report.is_clean() {
            info!(
                repairs = report.repairs(),
                escalations = report.escalations.len(),
                "reconciliation applied repairs"
            );
            metrics::counter!(crate::observability::RECONCILE_REPAIRS_TOTAL)
                .increment(report.repairs() as u64);
        }
        Ok(report)
    }

    async fn repair_duplicate_blackouts(
        &self,
        date: NaiveDate,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let Some(entries) = self.blackouts_for(&date) else {
            return Ok(());
        };
        if entries.len() <= 1 {
            return Ok(());
        }

        let earliest = entries
            .iter()
            .min_by_key(|b| b.created_at)
            .cloned()
            .expect("non-empty entries");
        warn!(
            %date,
            entries = entries.len(),
            kept_reason = %earliest.reason,
            "duplicate blackout entries, keeping earliest"
        );

        // Persist the repair so replay converges too.
        self.wal_append(vec![
            Event::DateUnblocked { date },
            Event::DateBlocked {
                date,
                reason: earliest.reason.clone(),
                created_at: earliest.created_at,
            },
        ])
        .await?;
        report.duplicate_blocks_trimmed += entries.len() - 1;
        self.set_blackouts(date, vec![earliest]);
        Ok(())
    }

    async fn reconcile_day(
        &self,
        date: NaiveDate,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let Some(day_arc) = self.get_day(&date) else {
            return Ok(());
        };
        let mut day = day_arc.write().await;
        let mut events = Vec::new();

        // Dangling mirrors: occupancy entries whose reservation is gone.
        let mirror_ids: Vec<Ulid> = day.occupancy.keys().copied().collect();
        for id in mirror_ids {
            if !day.reservations.contains_key(&id) {
                warn!(%id, %date, "dangling occupancy mirror removed");
                events.push(Event::OccupancyRemoved { id, date });
                report.dangling_removed.push(id);
            }
        }

        // Missing or drifted mirrors: the ledger is the source of truth.
        for r in day.reservations.values() {
            match day.occupancy.get(&r.id) {
                None => {
                    warn!(id = %r.id, %date, "missing occupancy mirror restored");
                    events.push(Event::OccupancyWritten {
                        entry: OccupancyEntry::mirror_of(r),
                    });
                    report.mirrors_restored.push(r.id);
                }
                Some(m) => {
                    if m.status != r.status || m.slot != r.slot || m.time_label != r.raw_time {
                        warn!(id = %r.id, %date, "occupancy mirror drift repaired from ledger");
                        events.push(Event::OccupancyWritten {
                            entry: OccupancyEntry::mirror_of(r),
                        });
                        report.drift_repaired.push(r.id);
                    }
                }
            }
        }

        // Double bookings: detectable, not auto-repairable.
        let mut by_slot: HashMap<usize, Vec<Ulid>> = HashMap::new();
        for r in day.reservations.values() {
            if r.is_active()
                && let Some(slot) = r.slot
            {
                by_slot.entry(slot).or_default().push(r.id);
            }
        }
        for (slot, mut ids) in by_slot {
            if ids.len() > 1 {
                ids.sort();
                warn!(%date, slot, ?ids, "double booking escalated to human queue");
                report.escalations.push(Anomaly::DoubleBooking { date, slot, ids });
            }
        }

        if !events.is_empty() {
            self.persist_and_apply(&mut day, events).await?;
        }
        Ok(())
    }
}
