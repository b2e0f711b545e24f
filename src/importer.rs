//! Spreadsheet-derived bulk import.
//!
//! Rows arrive by position from an externally authored sheet; the column
//! contract is fragile by nature and validated defensively, never assumed.
//! Import is two-phase: `ImportPlan::build` resolves candidates and reports
//! a count for the operator prompt; `commit` runs only after that explicit
//! confirmation. Rows are committed independently — partial success is
//! expected, and the outcome lists exactly which rows landed so the
//! operator can retry the remainder.

use std::io;

use chrono::NaiveDate;
use tracing::warn;

use crate::engine::{Engine, EngineError};
use crate::grid::SlotGrid;
use crate::limits::MAX_IMPORT_ROWS;
use crate::matcher::match_slot;
use crate::model::*;

// Positional column contract, as exported by the studio sheet.
const COL_SEQ: usize = 0;
const COL_CLIENT: usize = 2;
const COL_CONTACT: usize = 4;
const COL_TIME: usize = 5;
const COL_PACKAGE: usize = 6;
const COL_BASE_PRICE: usize = 8;
const COL_ADDONS: usize = 9;
const COL_DISCOUNT: usize = 10;
const COL_DP_AMOUNT: usize = 11;
const COL_DP_REFERENCE: usize = 12;
const COL_DP_INSTRUMENT: usize = 13;
const COL_FP_AMOUNT: usize = 14;
const COL_FP_REFERENCE: usize = 15;
const COL_FP_INSTRUMENT: usize = 16;
// Column 17 is the sheet's own computed balance — derived, ignored here.

/// A row that failed to commit. The batch continues past it.
#[derive(Debug)]
pub struct RowError {
    /// Zero-based row index in the input, for operator retry.
    pub row: usize,
    pub client_name: String,
    pub error: EngineError,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {} ({}): {}", self.row, self.client_name, self.error)
    }
}

/// A named row ready to become a confirmed reservation.
#[derive(Debug, Clone)]
pub struct RowCandidate {
    pub row: usize,
    pub new: NewReservation,
    /// Slot preview for the operator prompt; the engine re-resolves and
    /// re-arbitrates at commit time.
    pub slot: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub imported: Vec<Reservation>,
    pub skipped: Vec<RowError>,
}

/// The planned batch. Holds candidates only; nothing is written until
/// `commit`, which the caller invokes after showing `candidate_count()` to
/// a human.
#[derive(Debug)]
pub struct ImportPlan {
    pub target_date: NaiveDate,
    candidates: Vec<RowCandidate>,
    /// Header/chrome rows before the first sequence-numbered row.
    pub skipped_chrome: usize,
    /// Sequence rows with an empty client cell — empty grid cells, not errors.
    pub skipped_blank: usize,
}

impl ImportPlan {
    /// Plan an import from positional rows. Rows before the first row whose
    /// column 0 parses as an integer sequence number are header chrome.
    /// Rows without a client name are silently skipped.
    pub fn build(
        rows: &[Vec<String>],
        target_date: NaiveDate,
        grid: &SlotGrid,
    ) -> Result<Self, EngineError> {
        if rows.len() > MAX_IMPORT_ROWS {
            return Err(EngineError::LimitExceeded("too many rows in one import"));
        }

        let mut plan = Self {
            target_date,
            candidates: Vec::new(),
            skipped_chrome: 0,
            skipped_blank: 0,
        };

        let mut in_data = false;
        for (row_index, row) in rows.iter().enumerate() {
            if !in_data {
                let is_sequence_row = cell(row, COL_SEQ)
                    .is_some_and(|c| c.parse::<u64>().is_ok());
                if !is_sequence_row {
                    plan.skipped_chrome += 1;
                    continue;
                }
                in_data = true;
            }

            let Some(client_name) = cell(row, COL_CLIENT) else {
                plan.skipped_blank += 1;
                continue;
            };

            let raw_time = cell(row, COL_TIME).unwrap_or_default();
            let slot = match_slot(&raw_time, grid);
            let new = NewReservation {
                date: target_date,
                raw_time,
                client_name,
                contact: cell(row, COL_CONTACT),
                package: cell(row, COL_PACKAGE),
                pricing: parse_pricing(row, row_index),
                status: ReservationStatus::Confirmed,
            };
            plan.candidates.push(RowCandidate { row: row_index, new, slot });
        }

        Ok(plan)
    }

    /// Plan from CSV input. Unreadable records are counted as blanks and
    /// logged — spreadsheet exports are too messy for one bad line to kill
    /// the batch.
    pub fn from_csv_reader<R: io::Read>(
        reader: R,
        target_date: NaiveDate,
        grid: &SlotGrid,
    ) -> Result<Self, EngineError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut unreadable = 0usize;
        for record in csv_reader.records() {
            match record {
                Ok(r) => rows.push(r.iter().map(str::to_string).collect()),
                Err(e) => {
                    warn!("skipping unreadable csv record: {e}");
                    unreadable += 1;
                }
            }
        }

        let mut plan = Self::build(&rows, target_date, grid)?;
        plan.skipped_blank += unreadable;
        Ok(plan)
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn candidates(&self) -> &[RowCandidate] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Commit the batch. Calling this IS the operator's confirmation — the
    /// caller must have surfaced `candidate_count()` first. Every row is an
    /// independent create; collisions and store hiccups land in `skipped`
    /// while the rest of the batch proceeds.
    pub async fn commit(self, engine: &Engine) -> ImportOutcome {
        let mut outcome = ImportOutcome::default();
        for candidate in self.candidates {
            match engine.create_reservation(candidate.new.clone()).await {
                Ok(reservation) => {
                    metrics::counter!(crate::observability::IMPORT_ROWS_TOTAL).increment(1);
                    outcome.imported.push(reservation);
                }
                Err(error) => {
                    warn!(row = candidate.row, "import row skipped: {error}");
                    metrics::counter!(crate::observability::IMPORT_ROWS_SKIPPED_TOTAL).increment(1);
                    outcome.skipped.push(RowError {
                        row: candidate.row,
                        client_name: candidate.new.client_name,
                        error,
                    });
                }
            }
        }
        outcome
    }
}

fn cell(row: &[String], index: usize) -> Option<String> {
    row.get(index)
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn parse_pricing(row: &[String], row_index: usize) -> Pricing {
    Pricing {
        base_price: parse_money(row, COL_BASE_PRICE, row_index).unwrap_or(0),
        addons: parse_money(row, COL_ADDONS, row_index).unwrap_or(0),
        discount: parse_money(row, COL_DISCOUNT, row_index).unwrap_or(0),
        downpayment: parse_payment(row, COL_DP_AMOUNT, COL_DP_REFERENCE, COL_DP_INSTRUMENT, row_index),
        full_payment: parse_payment(row, COL_FP_AMOUNT, COL_FP_REFERENCE, COL_FP_INSTRUMENT, row_index),
    }
}

fn parse_payment(
    row: &[String],
    amount_col: usize,
    reference_col: usize,
    instrument_col: usize,
    row_index: usize,
) -> Option<Payment> {
    let amount = parse_money(row, amount_col, row_index)?;
    Some(Payment {
        amount,
        reference: cell(row, reference_col),
        instrument: cell(row, instrument_col),
    })
}

/// Parse a money cell into centavos. Currency symbols and thousands
/// separators are stripped; an unparseable non-empty cell becomes `None`
/// with a warning — money noise must not kill a row.
fn parse_money(row: &[String], index: usize, row_index: usize) -> Option<i64> {
    let raw = cell(row, index)?;
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Some((v * 100.0).round() as i64),
        _ => {
            warn!(row = row_index, col = index, cell = %raw, "unparseable money cell ignored");
            None
        }
    }
}
