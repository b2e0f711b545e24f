use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only timestamp type.
pub type Ms = i64;

/// One fixed-length bookable window in the day's canonical grid.
/// Identity is positional index within the generated sequence; slots are
/// recomputed on demand and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub day_offset_minutes: u32,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn new(day_offset_minutes: u32, duration_minutes: u32) -> Self {
        debug_assert!(duration_minutes > 0, "slot duration must be positive");
        Self {
            day_offset_minutes,
            duration_minutes,
        }
    }

    pub fn end_offset_minutes(&self) -> u32 {
        self.day_offset_minutes + self.duration_minutes
    }

    /// 12-hour display label for the slot start, e.g. `"9:00 AM"`.
    pub fn start_label(&self) -> String {
        format_minutes(self.day_offset_minutes)
    }

    /// 12-hour display label for the slot end, e.g. `"9:30 AM"`.
    pub fn end_label(&self) -> String {
        format_minutes(self.end_offset_minutes())
    }

    /// Range label for display, e.g. `"9:00 AM - 9:30 AM"`.
    pub fn range_label(&self) -> String {
        format!("{} - {}", self.start_label(), self.end_label())
    }
}

fn format_minutes(offset: u32) -> String {
    let h24 = (offset / 60) % 24;
    let m = offset % 60;
    let (h12, meridiem) = match h24 {
        0 => (12, "AM"),
        1..=11 => (h24, "AM"),
        12 => (12, "PM"),
        _ => (h24 - 12, "PM"),
    };
    format!("{h12}:{m:02} {meridiem}")
}

/// Reservation lifecycle status.
///
/// `Pending → Confirmed → Completed`, `Pending → Rejected`,
/// `Confirmed → Rejected`. No exits from `Completed` or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    Rejected,
}

impl ReservationStatus {
    /// Active reservations occupy their slot; rejected ones free it.
    pub fn is_active(self) -> bool {
        !matches!(self, ReservationStatus::Rejected)
    }

    pub fn can_transition(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Rejected) | (Confirmed, Completed) | (Confirmed, Rejected)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single payment leg, split by instrument (cash, bank transfer, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Amount in centavos.
    pub amount: i64,
    pub reference: Option<String>,
    pub instrument: Option<String>,
}

/// Monetary breakdown of a booking. Amounts in centavos; no currency
/// arithmetic beyond storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub base_price: i64,
    pub addons: i64,
    pub discount: i64,
    pub downpayment: Option<Payment>,
    pub full_payment: Option<Payment>,
}

impl Pricing {
    pub fn total(&self) -> i64 {
        self.base_price + self.addons - self.discount
    }
}

/// The authoritative booking record. Owned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub date: NaiveDate,
    /// Time label exactly as entered by staff, customer, or spreadsheet.
    pub raw_time: String,
    /// Resolved grid slot index. `None` = unresolved label, flagged for
    /// manual reconciliation — tolerated, never a denial of service.
    pub slot: Option<usize>,
    pub client_name: String,
    pub contact: Option<String>,
    pub package: Option<String>,
    pub pricing: Pricing,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub rejection_reason: Option<String>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Input to `create_reservation`. Status defaults to `Pending`; the
/// importer forces `Confirmed`.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub date: NaiveDate,
    pub raw_time: String,
    pub client_name: String,
    pub contact: Option<String>,
    pub package: Option<String>,
    pub pricing: Pricing,
    pub status: ReservationStatus,
}

impl NewReservation {
    pub fn new(date: NaiveDate, raw_time: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            date,
            raw_time: raw_time.into(),
            client_name: client_name.into(),
            contact: None,
            package: None,
            pricing: Pricing::default(),
            status: ReservationStatus::Pending,
        }
    }
}

/// Denormalized shadow of an active reservation, keyed by the same id.
/// Exists for fast "is this (date, slot) taken" checks without loading the
/// full ledger record. Best-effort consistency; reconciliation repairs
/// divergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyEntry {
    pub id: Ulid,
    pub date: NaiveDate,
    pub time_label: String,
    pub slot: Option<usize>,
    pub status: ReservationStatus,
}

impl OccupancyEntry {
    pub fn mirror_of(reservation: &Reservation) -> Self {
        Self {
            id: reservation.id,
            date: reservation.date,
            time_label: reservation.raw_time.clone(),
            slot: reservation.slot,
            status: reservation.status,
        }
    }
}

/// An administrator-declared fully unbookable day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutDate {
    pub date: NaiveDate,
    pub reason: String,
    pub created_at: Ms,
}

/// Per-slot availability state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Open,
    Occupied,
    Blocked,
}

/// Computed availability view for one date. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    /// Blackout reason when the whole day is blocked.
    pub blackout: Option<String>,
    /// One state per canonical grid slot, indexed by slot.
    pub slots: Vec<SlotState>,
}

impl DayAvailability {
    pub fn is_open(&self, slot: usize) -> bool {
        self.slots.get(slot) == Some(&SlotState::Open)
    }
}

/// Per-date ledger + occupancy mirror behind one lock. The two maps are
/// separate stores: they can diverge under partial failure and are diffed
/// by reconciliation.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    pub reservations: HashMap<Ulid, Reservation>,
    pub occupancy: HashMap<Ulid, OccupancyEntry>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            reservations: HashMap::new(),
            occupancy: HashMap::new(),
        }
    }

    /// Active mirror entry occupying `slot`, if any. This is the conditional
    /// checked by the transactional create path.
    pub fn active_slot_holder(&self, slot: usize) -> Option<&OccupancyEntry> {
        self.occupancy
            .values()
            .find(|e| e.slot == Some(slot) && e.status.is_active())
    }
}

/// The event types — flat, no nesting. WAL record format and change-feed
/// payload. Ledger and mirror carry separate events so the two stores can
/// genuinely diverge under a torn write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        date: NaiveDate,
        status: ReservationStatus,
        reason: Option<String>,
    },
    ReservationRepriced {
        id: Ulid,
        date: NaiveDate,
        pricing: Pricing,
    },
    ReservationDeleted {
        id: Ulid,
        date: NaiveDate,
    },
    OccupancyWritten {
        entry: OccupancyEntry,
    },
    OccupancyStatusChanged {
        id: Ulid,
        date: NaiveDate,
        status: ReservationStatus,
    },
    OccupancyRemoved {
        id: Ulid,
        date: NaiveDate,
    },
    DateBlocked {
        date: NaiveDate,
        reason: String,
        created_at: Ms,
    },
    DateUnblocked {
        date: NaiveDate,
    },
}

impl Event {
    /// Calendar day the event belongs to.
    pub fn date(&self) -> NaiveDate {
        match self {
            Event::ReservationCreated { reservation } => reservation.date,
            Event::ReservationStatusChanged { date, .. }
            | Event::ReservationRepriced { date, .. }
            | Event::ReservationDeleted { date, .. }
            | Event::OccupancyStatusChanged { date, .. }
            | Event::OccupancyRemoved { date, .. }
            | Event::DateBlocked { date, .. }
            | Event::DateUnblocked { date } => *date,
            Event::OccupancyWritten { entry } => entry.date,
        }
    }
}
