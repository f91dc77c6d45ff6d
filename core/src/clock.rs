//! Wall clock for the CRM core, swappable for a fixed clock in tests.

use crate::types::Timestamp;
use chrono::{Duration, Utc};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub enum CrmClock {
    #[default]
    System,
    Fixed { at: Mutex<Timestamp> },
}

impl CrmClock {
    pub fn fixed(at: Timestamp) -> Self {
        CrmClock::Fixed { at: Mutex::new(at) }
    }

    pub fn now(&self) -> Timestamp {
        match self {
            CrmClock::System => Utc::now(),
            CrmClock::Fixed { at } => *at.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Move a fixed clock forward. No-op on the system clock.
    pub fn advance(&self, by: Duration) {
        if let CrmClock::Fixed { at } = self {
            let mut guard = at.lock().unwrap_or_else(|e| e.into_inner());
            *guard += by;
        }
    }
}
