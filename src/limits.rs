//! Defensive caps. Inputs come from forms and spreadsheets; none of these
//! should ever bind in normal operation.

pub const MAX_CLIENT_NAME_LEN: usize = 256;
pub const MAX_CONTACT_LEN: usize = 64;
pub const MAX_PACKAGE_NAME_LEN: usize = 128;
pub const MAX_TIME_LABEL_LEN: usize = 64;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_PAYMENT_REFERENCE_LEN: usize = 128;

/// Upper bound on reservations held for a single day (ledger + unresolved).
pub const MAX_RESERVATIONS_PER_DAY: usize = 256;

/// Grid parameters: a day has 1440 minutes; steps under 5 minutes are noise.
pub const MAX_SLOTS_PER_DAY: usize = 288;
pub const MIN_STEP_MINUTES: u32 = 5;

/// Import batches above this are almost certainly a mis-selected sheet.
pub const MAX_IMPORT_ROWS: usize = 1000;

/// Reconciliation sweep window cap.
pub const MAX_DATES_PER_SWEEP: usize = 366;
