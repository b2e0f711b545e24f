use chrono::NaiveDate;
use ulid::Ulid;

use crate::grid::ConfigError;
use crate::model::ReservationStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Invalid grid parameters — fatal at startup.
    Config(ConfigError),
    /// The target (date, slot) is held by an active reservation.
    SlotTaken { slot: usize, holder: Ulid },
    /// The whole day is blacked out; checked before slot arbitration.
    Blackout { date: NaiveDate, reason: String },
    /// The date is already blocked; surfaced as a confirmable no-op, the
    /// existing reason is never silently overwritten.
    DuplicateBlock(NaiveDate),
    NotFound(Ulid),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    /// Rejection without a reason string.
    MissingReason,
    Validation(&'static str),
    LimitExceeded(&'static str),
    /// Backing-store (WAL) failure — transient, retryable with backoff.
    Store(String),
}

impl EngineError {
    /// Callers may retry these; nothing was committed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "grid configuration: {e}"),
            EngineError::SlotTaken { slot, holder } => {
                write!(f, "slot {slot} is taken by reservation {holder}")
            }
            EngineError::Blackout { date, reason } => {
                write!(f, "{date} is blacked out: {reason}")
            }
            EngineError::DuplicateBlock(date) => write!(f, "{date} is already blocked"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::MissingReason => write!(f, "rejection requires a reason"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}
