use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{Actor, SenderRole};

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub connection_id: Uuid,
    pub role: SenderRole,
    pub since: DateTime<Utc>,
}

/// Which parties currently hold a connection. One entry per party; the
/// latest connection wins.
#[derive(Default)]
pub struct PresenceRegistry {
    parties: DashMap<Uuid, PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_online(&self, actor: &Actor, connection_id: Uuid) {
        self.parties.insert(
            actor.id(),
            PresenceEntry {
                connection_id,
                role: actor.role(),
                since: Utc::now(),
            },
        );
    }

    /// Clears presence only if `connection_id` is the party's current
    /// connection. A stale socket closing after a reconnect returns false.
    pub fn mark_offline(&self, actor: &Actor, connection_id: Uuid) -> bool {
        self.parties
            .remove_if(&actor.id(), |_, entry| entry.connection_id == connection_id)
            .is_some()
    }

    pub fn is_online(&self, party_id: Uuid) -> bool {
        self.parties.contains_key(&party_id)
    }

    pub fn online_count(&self) -> usize {
        self.parties.len()
    }
}
