//! End-to-end scenarios through the public API: the import pipeline, the
//! blackout flow, slot arbitration, reconciliation, and the outbound
//! notifier.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use shutterbook::engine::{Engine, EngineError};
use shutterbook::grid::{GridConfig, SlotGrid};
use shutterbook::importer::ImportPlan;
use shutterbook::model::{NewReservation, ReservationStatus, SlotState};
use shutterbook::notifier::{ChangeNotifier, EventSink, OutboundEvent, OutboundKind};
use shutterbook::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("shutterbook_int_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn studio_engine(name: &str) -> Arc<Engine> {
    Arc::new(
        Engine::new(
            test_wal_path(name),
            SlotGrid::studio_default(),
            Arc::new(NotifyHub::new()),
        )
        .unwrap(),
    )
}

fn two_slot_grid() -> SlotGrid {
    SlotGrid::generate(GridConfig {
        start_minute: 9 * 60,
        end_minute: 10 * 60,
        step_minutes: 30,
    })
    .unwrap()
}

/// Sheet rows shaped like the studio export: a title row, a header row,
/// then sequence-numbered data rows.
fn sheet_row(seq: &str, client: &str, time: &str) -> Vec<String> {
    let mut row = vec![String::new(); 18];
    row[0] = seq.into();
    row[2] = client.into();
    row[5] = time.into();
    row
}

#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<OutboundEvent>>>,
}

impl RecordingSink {
    fn recorded(&self) -> Vec<OutboundEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(
        &self,
        event: &OutboundEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ── Import pipeline ──────────────────────────────────────────

#[tokio::test]
async fn import_sheet_reports_collisions() {
    init_tracing();
    let grid = two_slot_grid();
    let engine = Engine::new(test_wal_path("import.wal"), grid.clone(), Arc::new(NotifyHub::new())).unwrap();
    let d = date("2025-06-01");

    let rows = vec![
        vec!["Studio Schedule".to_string()],
        sheet_row("1", "Jane", "9:00-9:30 am"),
        sheet_row("2", "Rae", "9:00-9:30 am"), // collides with Jane
        sheet_row("3", "", ""),                // empty grid cell
    ];

    let plan = ImportPlan::build(&rows, d, &grid).unwrap();
    // The human gate: the operator sees the count before anything commits
    assert_eq!(plan.candidate_count(), 2);
    assert_eq!(plan.skipped_blank, 1);

    let outcome = plan.commit(&engine).await;

    assert_eq!(outcome.imported.len(), 1);
    let jane = &outcome.imported[0];
    assert_eq!(jane.client_name, "Jane");
    assert_eq!(jane.slot, Some(0));
    assert_eq!(jane.status, ReservationStatus::Confirmed);

    // The collision is reported, never silently dropped
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].client_name, "Rae");
    assert!(matches!(outcome.skipped[0].error, EngineError::SlotTaken { slot: 0, .. }));
}

#[tokio::test]
async fn import_partial_success_reports_exact_remainder() {
    let grid = two_slot_grid();
    let engine = Engine::new(test_wal_path("partial.wal"), grid.clone(), Arc::new(NotifyHub::new())).unwrap();
    let d = date("2025-06-01");

    // Slot 1 is already taken by a walk-in
    engine
        .create_reservation(NewReservation::new(d, "9:30 AM", "Walk-in"))
        .await
        .unwrap();

    let rows = vec![
        sheet_row("1", "Jane", "9:00-9:30 am"),
        sheet_row("2", "Rae", "9:30-10:00 am"), // loses to the walk-in
    ];
    let outcome = ImportPlan::build(&rows, d, &grid)
        .unwrap()
        .commit(&engine)
        .await;

    // Exactly which rows landed is reported so the operator retries only the rest
    assert_eq!(outcome.imported.len(), 1);
    assert_eq!(outcome.imported[0].client_name, "Jane");
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].row, 1);

    // Retrying just the remainder after the walk-in frees the slot works
    let walkins = engine.reservations_on(d).await;
    let walkin = walkins.iter().find(|r| r.client_name == "Walk-in").unwrap();
    engine.delete_reservation(walkin.id).await.unwrap();

    let retry_rows = vec![sheet_row("2", "Rae", "9:30-10:00 am")];
    let retry = ImportPlan::build(&retry_rows, d, &grid)
        .unwrap()
        .commit(&engine)
        .await;
    assert_eq!(retry.imported.len(), 1);
    assert!(retry.skipped.is_empty());
}

#[tokio::test]
async fn import_into_blacked_out_day_skips_every_row() {
    let grid = two_slot_grid();
    let engine = Engine::new(test_wal_path("import_blackout.wal"), grid.clone(), Arc::new(NotifyHub::new())).unwrap();
    let d = date("2025-12-25");
    engine.block_date(d, "Holiday").await.unwrap();

    let rows = vec![sheet_row("1", "Jane", "9:00-9:30 am")];
    let outcome = ImportPlan::build(&rows, d, &grid)
        .unwrap()
        .commit(&engine)
        .await;

    assert!(outcome.imported.is_empty());
    assert_eq!(outcome.skipped.len(), 1);
    assert!(matches!(outcome.skipped[0].error, EngineError::Blackout { .. }));
}

// ── Booking + blackout flows ─────────────────────────────────

#[tokio::test]
async fn holiday_blackout_flow() {
    let engine = studio_engine("holiday.wal");
    let d = date("2025-12-25");

    engine.block_date(d, "Holiday").await.unwrap();

    let view = engine.day_availability(d).await;
    assert!(view.slots.iter().all(|s| *s == SlotState::Blocked));

    let result = engine
        .create_reservation(NewReservation::new(d, "9:00 AM", "Jane"))
        .await;
    assert!(matches!(result, Err(EngineError::Blackout { .. })));
}

#[tokio::test]
async fn rejecting_a_confirmed_booking_reopens_the_slot() {
    let engine = studio_engine("reopen.wal");
    let d = date("2025-06-01");

    let r = engine
        .create_reservation(NewReservation::new(d, "9:00 AM", "Jane"))
        .await
        .unwrap();
    engine.update_status(r.id, ReservationStatus::Confirmed, None).await.unwrap();
    assert_eq!(engine.day_availability(d).await.slots[0], SlotState::Occupied);

    engine
        .update_status(r.id, ReservationStatus::Rejected, Some("duplicate booking"))
        .await
        .unwrap();

    assert_eq!(engine.day_availability(d).await.slots[0], SlotState::Open);
    engine
        .create_reservation(NewReservation::new(d, "9:00 AM", "Rae"))
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_then_reconcile_leaves_no_dangling_mirrors() {
    init_tracing();
    let engine = studio_engine("clean_delete.wal");
    let d = date("2025-06-01");

    for (time, name) in [("9:00 AM", "Jane"), ("10:00 AM", "Rae"), ("11:00 AM", "Lee")] {
        engine
            .create_reservation(NewReservation::new(d, time, name))
            .await
            .unwrap();
    }
    for r in engine.reservations_on(d).await {
        engine.delete_reservation(r.id).await.unwrap();
    }

    let report = engine.reconcile(&[d]).await.unwrap();
    assert!(report.is_clean());
    assert!(engine.occupancy_on(d).await.is_empty());
}

// ── Notifier over the live feed ──────────────────────────────

#[tokio::test]
async fn import_alerts_once_per_imported_row() {
    let grid = two_slot_grid();
    let engine = Arc::new(
        Engine::new(test_wal_path("notify_import.wal"), grid.clone(), Arc::new(NotifyHub::new())).unwrap(),
    );
    let sink = RecordingSink::default();
    tokio::spawn(ChangeNotifier::new(engine.clone(), sink.clone()).run());

    let d = date("2025-06-01");
    let rows = vec![
        sheet_row("1", "Jane", "9:00-9:30 am"),
        sheet_row("2", "Rae", "9:30-10:00 am"),
        sheet_row("3", "Lee", "9:00-9:30 am"), // skipped — no alert
    ];
    let outcome = ImportPlan::build(&rows, d, &grid)
        .unwrap()
        .commit(&engine)
        .await;
    assert_eq!(outcome.imported.len(), 2);

    wait_for(|| {
        sink.recorded()
            .iter()
            .filter(|e| e.kind == OutboundKind::NewReservation)
            .count()
            == 2
    })
    .await;

    // Settled: still exactly two creation alerts, none for the skipped row
    tokio::time::sleep(Duration::from_millis(50)).await;
    let creations: Vec<_> = sink
        .recorded()
        .into_iter()
        .filter(|e| e.kind == OutboundKind::NewReservation)
        .collect();
    assert_eq!(creations.len(), 2);
    let ids: Vec<Ulid> = outcome.imported.iter().map(|r| r.id).collect();
    assert!(creations.iter().all(|e| ids.contains(&e.reservation_id)));
}

#[tokio::test]
async fn status_updates_reach_the_sink_with_slot_context() {
    let engine = studio_engine("notify_status.wal");
    let sink = RecordingSink::default();
    tokio::spawn(ChangeNotifier::new(engine.clone(), sink.clone()).run());

    let d = date("2025-06-01");
    let r = engine
        .create_reservation(NewReservation::new(d, "2:00 PM", "Jane"))
        .await
        .unwrap();
    engine.update_status(r.id, ReservationStatus::Confirmed, None).await.unwrap();

    wait_for(|| sink.recorded().len() >= 2).await;
    let events = sink.recorded();
    let status_event = events
        .iter()
        .find(|e| e.kind == OutboundKind::StatusChanged)
        .unwrap();
    assert_eq!(status_event.reservation_id, r.id);
    assert_eq!(status_event.date, d);
    assert_eq!(status_event.slot, Some(10));
    assert_eq!(status_event.status, ReservationStatus::Confirmed);
}

// ── Durability across restart ────────────────────────────────

#[tokio::test]
async fn restart_preserves_bookings_and_blackouts() {
    let path = test_wal_path("restart.wal");
    let d = date("2025-06-01");

    let id = {
        let engine = Engine::new(path.clone(), SlotGrid::studio_default(), Arc::new(NotifyHub::new())).unwrap();
        let r = engine
            .create_reservation(NewReservation::new(d, "9:00 AM", "Jane"))
            .await
            .unwrap();
        engine.update_status(r.id, ReservationStatus::Confirmed, None).await.unwrap();
        engine.block_date(date("2025-12-25"), "Holiday").await.unwrap();
        r.id
    };

    let engine = Engine::new(path, SlotGrid::studio_default(), Arc::new(NotifyHub::new())).unwrap();
    let restored = engine.get_reservation(&id).await.unwrap();
    assert_eq!(restored.status, ReservationStatus::Confirmed);
    assert_eq!(restored.client_name, "Jane");
    assert!(engine.blackout_on(&date("2025-12-25")).is_some());
    assert!(engine.reconcile(&[d]).await.unwrap().is_clean());
}
