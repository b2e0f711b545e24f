use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events. Calendar views subscribe per date;
/// the change notifier consumes the firehose carrying every event.
/// Notifications fire after the WAL flush, so subscribers only ever see
/// durable state.
pub struct NotifyHub {
    channels: DashMap<NaiveDate, broadcast::Sender<Event>>,
    firehose: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            firehose: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to events for a single date. Creates the channel if needed.
    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every committed event.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.firehose.subscribe()
    }

    /// Publish an event to its date channel and the firehose. No-op where
    /// nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.date()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.firehose.send(event.clone());
    }

    /// Drop a date channel (e.g. once the day is archived).
    #[allow(dead_code)]
    pub fn remove(&self, date: &NaiveDate) {
        self.channels.remove(date);
    }
}
