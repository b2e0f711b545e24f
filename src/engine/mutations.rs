use chrono::NaiveDate;
use tracing::warn;
use ulid::Ulid;

use crate::limits::*;
use crate::matcher::match_slot;
use crate::model::*;

use super::{now_ms, Engine, EngineError};

fn validate_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

fn validate_pricing(pricing: &Pricing) -> Result<(), EngineError> {
    for payment in [&pricing.downpayment, &pricing.full_payment].into_iter().flatten() {
        validate_len(
            payment.reference.as_deref(),
            MAX_PAYMENT_REFERENCE_LEN,
            "payment reference too long",
        )?;
    }
    Ok(())
}

impl Engine {
    /// Create a reservation and its occupancy mirror as one committed batch.
    ///
    /// This is the only cross-client race in the system, and the one place
    /// an all-or-nothing boundary is mandatory: the day write-lock is held
    /// across the blackout gate, the slot-occupancy conditional, and the WAL
    /// commit, so concurrent attempts on the same (date, slot) serialize and
    /// exactly one wins. An unresolved time label is accepted — staff
    /// correct those later — it just cannot claim a slot.
    pub async fn create_reservation(
        &self,
        new: NewReservation,
    ) -> Result<Reservation, EngineError> {
        if new.client_name.trim().is_empty() {
            return Err(EngineError::Validation("client name is required"));
        }
        if new.client_name.len() > MAX_CLIENT_NAME_LEN {
            return Err(EngineError::LimitExceeded("client name too long"));
        }
        if new.raw_time.len() > MAX_TIME_LABEL_LEN {
            return Err(EngineError::LimitExceeded("time label too long"));
        }
        validate_len(new.contact.as_deref(), MAX_CONTACT_LEN, "contact too long")?;
        validate_len(new.package.as_deref(), MAX_PACKAGE_NAME_LEN, "package name too long")?;
        validate_pricing(&new.pricing)?;
        if !matches!(new.status, ReservationStatus::Pending | ReservationStatus::Confirmed) {
            return Err(EngineError::Validation("new reservations start pending or confirmed"));
        }

        let day_arc = self.day(new.date);
        let mut day = day_arc.write().await;
        if day.reservations.len() >= MAX_RESERVATIONS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many reservations on this day"));
        }

        // Blackout gate: runs before any slot arbitration.
        if let Some(blackout) = self.blackout_on(&new.date) {
            return Err(EngineError::Blackout {
                date: new.date,
                reason: blackout.reason,
            });
        }

        let slot = match_slot(&new.raw_time, &self.grid);
        if slot.is_none() {
            warn!(date = %new.date, raw_time = %new.raw_time, "unresolved time label, flagged for manual reconciliation");
        }

        // Conditional occupancy check: a freed (rejected) entry does not block.
        if let Some(idx) = slot
            && let Some(holder) = day.active_slot_holder(idx) {
                metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::SlotTaken {
                    slot: idx,
                    holder: holder.id,
                });
            }

        let reservation = Reservation {
            id: Ulid::new(),
            date: new.date,
            raw_time: new.raw_time,
            slot,
            client_name: new.client_name,
            contact: new.contact,
            package: new.package,
            pricing: new.pricing,
            status: new.status,
            created_at: now_ms(),
            rejection_reason: None,
        };
        let mirror = OccupancyEntry::mirror_of(&reservation);

        self.persist_and_apply(
            &mut day,
            vec![
                Event::ReservationCreated {
                    reservation: reservation.clone(),
                },
                Event::OccupancyWritten { entry: mirror },
            ],
        )
        .await?;

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Transition a reservation's status. `Rejected` requires a reason.
    /// The mirror's status is updated when the mirror exists; a missing
    /// mirror is logged and left to reconciliation.
    pub async fn update_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        if status == ReservationStatus::Rejected
            && reason.is_none_or(|r| r.trim().is_empty())
        {
            return Err(EngineError::MissingReason);
        }
        validate_len(reason, MAX_REASON_LEN, "reason too long")?;

        let (date, mut day) = self.resolve_day_write(&id).await?;
        let current = day.reservations.get(&id).ok_or(EngineError::NotFound(id))?;
        if !current.status.can_transition(status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let mut events = vec![Event::ReservationStatusChanged {
            id,
            date,
            status,
            reason: reason.map(str::to_string),
        }];
        if day.occupancy.contains_key(&id) {
            events.push(Event::OccupancyStatusChanged { id, date, status });
        } else {
            warn!(%id, %date, "occupancy mirror missing on status change; reconciliation will repair");
        }

        self.persist_and_apply(&mut day, events).await?;
        metrics::counter!(
            crate::observability::STATUS_CHANGES_TOTAL,
            "status" => status.as_str()
        )
        .increment(1);
        Ok(())
    }

    /// Staff edit of the monetary fields.
    pub async fn update_pricing(&self, id: Ulid, pricing: Pricing) -> Result<(), EngineError> {
        validate_pricing(&pricing)?;
        let (date, mut day) = self.resolve_day_write(&id).await?;
        if !day.reservations.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut day, vec![Event::ReservationRepriced { id, date, pricing }])
            .await
    }

    /// Remove a reservation. The ledger removal must commit; retracting the
    /// mirror is best-effort — on failure the delete still succeeds and the
    /// dangling entry is left for reconciliation.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let (date, mut day) = self.resolve_day_write(&id).await?;
        if !day.reservations.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        self.persist_and_apply(&mut day, vec![Event::ReservationDeleted { id, date }])
            .await?;
        metrics::counter!(crate::observability::RESERVATIONS_DELETED_TOTAL).increment(1);

        if day.occupancy.contains_key(&id)
            && let Err(e) = self
                .persist_and_apply(&mut day, vec![Event::OccupancyRemoved { id, date }])
                .await
        {
            warn!(%id, %date, "occupancy mirror left dangling on delete; reconciliation will repair: {e}");
        }
        Ok(())
    }

    /// Block an entire day. Refuses to overwrite an existing block — the
    /// caller surfaces that as a confirmable no-op, never a silent
    /// reason swap. Existing reservations are untouched.
    pub async fn block_date(&self, date: NaiveDate, reason: &str) -> Result<(), EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation("blackout reason is required"));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        if self.blackouts.get(&date).is_some_and(|v| !v.value().is_empty()) {
            return Err(EngineError::DuplicateBlock(date));
        }

        let created_at = now_ms();
        let event = Event::DateBlocked {
            date,
            reason: reason.to_string(),
            created_at,
        };
        self.wal_append(vec![event.clone()]).await?;
        self.blackouts.entry(date).or_default().push(BlackoutDate {
            date,
            reason: reason.to_string(),
            created_at,
        });
        self.notify.send(&event);
        metrics::gauge!(crate::observability::BLACKOUTS_ACTIVE).set(self.blackouts.len() as f64);
        Ok(())
    }

    /// Remove every blackout entry for the date. Removing an unblocked date
    /// is a no-op; finding more than one entry is an anomaly worth noting.
    pub async fn unblock_date(&self, date: NaiveDate) -> Result<(), EngineError> {
        let existing = match self.blackouts.get(&date) {
            Some(v) if !v.value().is_empty() => v.value().len(),
            _ => return Ok(()),
        };
        if existing > 1 {
            warn!(%date, entries = existing, "duplicate blackout entries removed together");
        }

        let event = Event::DateUnblocked { date };
        self.wal_append(vec![event.clone()]).await?;
        self.blackouts.remove(&date);
        self.notify.send(&event);
        metrics::gauge!(crate::observability::BLACKOUTS_ACTIVE).set(self.blackouts.len() as f64);
        Ok(())
    }
}
