//! Background maintenance: the periodic reconciliation sweep and the WAL
//! compactor. The sweep is the backstop for the non-atomicity between the
//! ledger and its occupancy mirror — it must run; UI-triggered deletes are
//! never the only repair mechanism.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::engine::{now_ms, Engine};
use crate::limits::MAX_DATES_PER_SWEEP;

/// Dates worth sweeping: every date with recorded state or a blackout,
/// restricted to `[today - lookback, today + horizon]`.
fn sweep_window(engine: &Engine, today: NaiveDate, lookback_days: u64, horizon_days: u64) -> Vec<NaiveDate> {
    let from = today.checked_sub_days(Days::new(lookback_days)).unwrap_or(today);
    let to = today.checked_add_days(Days::new(horizon_days)).unwrap_or(today);

    let mut dates: Vec<NaiveDate> = engine
        .known_dates()
        .into_iter()
        .chain(engine.blackouts().into_iter().map(|b| b.date))
        .filter(|d| *d >= from && *d <= to)
        .collect();
    dates.sort();
    dates.dedup();
    dates.truncate(MAX_DATES_PER_SWEEP);
    dates
}

/// Periodically reconcile a rolling date window around today.
pub async fn run_sweeper(
    engine: Arc<Engine>,
    period: Duration,
    lookback_days: u64,
    horizon_days: u64,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let Some(today) = chrono::DateTime::from_timestamp_millis(now_ms()).map(|t| t.date_naive())
        else {
            continue;
        };
        let dates = sweep_window(&engine, today, lookback_days, horizon_days);
        if dates.is_empty() {
            continue;
        }
        match engine.reconcile(&dates).await {
            Ok(report) if report.is_clean() => debug!(dates = dates.len(), "sweep clean"),
            Ok(report) => info!(
                repairs = report.repairs(),
                escalations = report.escalations.len(),
                "sweep repaired divergence"
            ),
            // Transient store failure — the next tick retries
            Err(e) => warn!("sweep failed: {e}"),
        }
    }
}

/// Rewrite the WAL from current state once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
