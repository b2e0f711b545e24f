//! Status/change notifier.
//!
//! Observes the committed-event firehose and emits outbound domain events
//! for delivery collaborators (email, desktop alerts — out of scope here).
//! New-reservation detection diffs by identifier set, carried as per-session
//! state inside the notifier: a concurrent delete and create can never
//! cancel each other out, and a given creation alerts at most once per
//! session — including across broadcast lag, which triggers a snapshot
//! resync instead of a missed or doubled alert.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::{Event, ReservationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    NewReservation,
    StatusChanged,
}

/// The wire shape consumed by delivery mechanisms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub kind: OutboundKind,
    pub reservation_id: Ulid,
    pub date: NaiveDate,
    pub slot: Option<usize>,
    pub status: ReservationStatus,
}

impl OutboundEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Delivery seam. Implementations own their retry/queueing semantics; the
/// notifier logs failures and moves on.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(
        &self,
        event: &OutboundEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct ChangeNotifier<S> {
    engine: Arc<Engine>,
    sink: S,
    feed: broadcast::Receiver<Event>,
    /// Identifier-set watermark for this session. Ids present at startup
    /// are not "new"; ids of deleted reservations are dropped to keep the
    /// set bounded (ULIDs are never reused).
    seen: HashSet<Ulid>,
}

impl<S: EventSink> ChangeNotifier<S> {
    /// Subscribes and snapshots the watermark together, so nothing created
    /// between construction and `run` is missed or double-counted.
    pub fn new(engine: Arc<Engine>, sink: S) -> Self {
        let feed = engine.notify.subscribe_all();
        let seen = engine.ledger_ids().into_iter().collect();
        Self { engine, sink, feed, seen }
    }

    /// Consume the firehose until the engine shuts down.
    pub async fn run(mut self) {
        loop {
            match self.feed.recv().await {
                Ok(event) => self.handle(event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "notifier lagged behind the feed, resyncing by id set");
                    self.resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("notifier feed closed");
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                // Insert returning false = already alerted this session
                if self.seen.insert(reservation.id) {
                    self.emit(OutboundEvent {
                        kind: OutboundKind::NewReservation,
                        reservation_id: reservation.id,
                        date: reservation.date,
                        slot: reservation.slot,
                        status: reservation.status,
                    })
                    .await;
                }
            }
            Event::ReservationStatusChanged { id, date, status, .. } => {
                let slot = self
                    .engine
                    .get_reservation(&id)
                    .await
                    .and_then(|r| r.slot);
                self.emit(OutboundEvent {
                    kind: OutboundKind::StatusChanged,
                    reservation_id: id,
                    date,
                    slot,
                    status,
                })
                .await;
            }
            Event::ReservationDeleted { id, .. } => {
                self.seen.remove(&id);
            }
            // Repricing, mirror writes, and blackout toggles are not outbound
            _ => {}
        }
    }

    /// Recover from broadcast lag: diff current ledger ids against the
    /// watermark. Creations missed in the gap alert exactly once; deletions
    /// just shrink the watermark. Status changes missed in the gap are
    /// dropped — the guarantee is at-most-once per creation, not
    /// at-least-once delivery.
    async fn resync(&mut self) {
        let current: HashSet<Ulid> = self.engine.ledger_ids().into_iter().collect();

        let mut fresh: Vec<Ulid> = current.difference(&self.seen).copied().collect();
        fresh.sort();
        for id in fresh {
            self.seen.insert(id);
            let Some(reservation) = self.engine.get_reservation(&id).await else {
                continue; // deleted between snapshot and lookup
            };
            self.emit(OutboundEvent {
                kind: OutboundKind::NewReservation,
                reservation_id: id,
                date: reservation.date,
                slot: reservation.slot,
                status: reservation.status,
            })
            .await;
        }

        self.seen.retain(|id| current.contains(id));
    }

    async fn emit(&self, event: OutboundEvent) {
        metrics::counter!(crate::observability::NOTIFIER_EVENTS_TOTAL).increment(1);
        if let Err(e) = self.sink.deliver(&event).await {
            warn!(id = %event.reservation_id, "event sink delivery failed: {e}");
        }
    }
}
