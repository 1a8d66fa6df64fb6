use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use crate::events::ServerEvent;

/// Fan-out to every connection currently in a consultation room.
pub trait RoomBroadcaster: Send + Sync {
    fn publish(&self, consultation_id: Uuid, event: &ServerEvent);

    /// Whether anyone is still connected to the room.
    fn has_members(&self, _consultation_id: Uuid) -> bool {
        true
    }
}

/// Captures published events instead of delivering them.
#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<(Uuid, ServerEvent)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Uuid, ServerEvent)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events_named(&self, name: &str) -> Vec<ServerEvent> {
        self.events()
            .into_iter()
            .map(|(_, event)| event)
            .filter(|event| event.name() == name)
            .collect()
    }
}

impl RoomBroadcaster for RecordingBroadcaster {
    fn publish(&self, consultation_id: Uuid, event: &ServerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((consultation_id, event.clone()));
    }
}
