use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations created (staff, customer, or import).
pub const RESERVATIONS_CREATED_TOTAL: &str = "shutterbook_reservations_created_total";

/// Counter: creates rejected by slot arbitration.
pub const SLOT_CONFLICTS_TOTAL: &str = "shutterbook_slot_conflicts_total";

/// Counter: status transitions. Labels: status.
pub const STATUS_CHANGES_TOTAL: &str = "shutterbook_status_changes_total";

/// Counter: reservations deleted.
pub const RESERVATIONS_DELETED_TOTAL: &str = "shutterbook_reservations_deleted_total";

/// Counter: import rows committed.
pub const IMPORT_ROWS_TOTAL: &str = "shutterbook_import_rows_total";

/// Counter: import rows skipped with a row error.
pub const IMPORT_ROWS_SKIPPED_TOTAL: &str = "shutterbook_import_rows_skipped_total";

/// Counter: outbound events handed to the sink.
pub const NOTIFIER_EVENTS_TOTAL: &str = "shutterbook_notifier_events_total";

// ── USE metrics (resource/consistency) ──────────────────────────

/// Gauge: dates currently blacked out.
pub const BLACKOUTS_ACTIVE: &str = "shutterbook_blackouts_active";

/// Counter: reconciliation repairs applied (dangling, missing, drift,
/// duplicate blocks).
pub const RECONCILE_REPAIRS_TOTAL: &str = "shutterbook_reconcile_repairs_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shutterbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shutterbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
