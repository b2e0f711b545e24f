//! Slot-based booking scheduler and consistency engine for a single-studio
//! timeline: a fixed daily grid of bookable slots, exclusive slot occupancy
//! arbitrated at create time, a denormalized occupancy index for fast
//! availability checks, administrator blackout dates, a human-gated bulk
//! importer, and an at-most-once change notifier.
//!
//! State lives behind per-date locks and is durable via an append-only WAL;
//! committed events fan out over per-date channels and a global firehose.
//! The ledger and its occupancy mirror are deliberately separate stores —
//! reconciliation (on demand or via the background sweeper) detects and
//! repairs divergence between them.
//!
//! No service surface is prescribed: wrap [`engine::Engine`] in whatever
//! boundary the host application needs.

pub mod engine;
pub mod grid;
pub mod importer;
pub mod limits;
pub mod matcher;
pub mod model;
pub mod notifier;
pub mod notify;
pub mod observability;
pub mod sweeper;
pub mod wal;

pub use engine::{Engine, EngineError};
pub use grid::{ConfigError, GridConfig, SlotGrid};
pub use model::{
    DayAvailability, Event, NewReservation, OccupancyEntry, Reservation, ReservationStatus, Slot,
    SlotState,
};
