//! Notifier collaborator.
//!
//! RULE: the engine hands each event to the notifier exactly once,
//! after the transition has been persisted. Delivery is fire-and-forget.

use crate::event::CrmEvent;
use std::sync::Mutex;

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &CrmEvent);
}

/// Default notifier: writes every event to the log facade.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &CrmEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => log::info!("notify {}: {payload}", event.event_type()),
            Err(e) => log::warn!("notify {}: unserializable payload: {e}", event.event_type()),
        }
    }
}

/// Keeps every event in memory for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<CrmEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CrmEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &CrmEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Lets a shared `Arc<RecordingNotifier>` be handed to the engine while the
/// caller keeps a handle for inspection.
impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, event: &CrmEvent) {
        (**self).notify(event)
    }
}
