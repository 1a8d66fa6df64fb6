use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::events::ServerEvent;
use crate::models::Party;
use crate::services::broadcaster::RoomBroadcaster;

pub type ConnectionId = Uuid;

struct Connection {
    party: Party,
    outbound: mpsc::Sender<String>,
}

/// Live connections and the rooms they have joined. Each connection owns a
/// bounded outbound queue drained by its socket writer.
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<Uuid, HashSet<ConnectionId>>,
    queue_capacity: usize,
}

impl ConnectionHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn register(&self, party: Party) -> (ConnectionId, mpsc::Receiver<String>) {
        let connection_id = Uuid::new_v4();
        let (outbound, receiver) = mpsc::channel(self.queue_capacity);
        self.connections
            .insert(connection_id, Connection { party, outbound });
        (connection_id, receiver)
    }

    /// Removes the connection everywhere. Returns the rooms it was in and
    /// whether each is now empty.
    pub fn unregister(&self, connection_id: ConnectionId) -> Vec<(Uuid, bool)> {
        self.connections.remove(&connection_id);

        let mut left = Vec::new();
        self.rooms.retain(|room, members| {
            if members.remove(&connection_id) {
                left.push((*room, members.is_empty()));
            }
            !members.is_empty()
        });
        left
    }

    pub fn join_room(&self, connection_id: ConnectionId, consultation_id: Uuid) {
        self.rooms
            .entry(consultation_id)
            .or_default()
            .insert(connection_id);
    }

    pub fn room_members(&self, consultation_id: Uuid) -> Vec<ConnectionId> {
        self.rooms
            .get(&consultation_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        match encode(event) {
            Some(frame) => self.deliver(connection_id, frame),
            None => false,
        }
    }

    pub fn publish_except(
        &self,
        consultation_id: Uuid,
        except: ConnectionId,
        event: &ServerEvent,
    ) {
        let Some(frame) = encode(event) else { return };
        for member in self.room_members(consultation_id) {
            if member != except {
                self.deliver(member, frame.clone());
            }
        }
    }

    /// Delivers to every connection except `except`, room membership aside.
    pub fn broadcast_all_except(&self, except: Option<ConnectionId>, event: &ServerEvent) {
        let Some(frame) = encode(event) else { return };
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|connection| *connection.key())
            .filter(|id| Some(*id) != except)
            .collect();
        for target in targets {
            self.deliver(target, frame.clone());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drops every outbound sender so socket writers close their sockets.
    pub fn close_all(&self) -> usize {
        let closed = self.connections.len();
        self.connections.clear();
        self.rooms.clear();
        closed
    }

    /// A full queue means a stalled reader. The frame is dropped rather than
    /// blocking the sender.
    fn deliver(&self, connection_id: ConnectionId, frame: String) -> bool {
        let Some(connection) = self.connections.get(&connection_id) else {
            return false;
        };
        match connection.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for connection {} ({}), dropping frame",
                    connection_id, connection.party.name
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} already closed", connection_id);
                false
            }
        }
    }
}

impl RoomBroadcaster for ConnectionHub {
    fn publish(&self, consultation_id: Uuid, event: &ServerEvent) {
        let Some(frame) = encode(event) else { return };
        let members = self.room_members(consultation_id);
        debug!(
            "Publishing {} to {} connections in consultation {}",
            event.name(),
            members.len(),
            consultation_id
        );
        for member in members {
            self.deliver(member, frame.clone());
        }
    }

    fn has_members(&self, consultation_id: Uuid) -> bool {
        self.rooms
            .get(&consultation_id)
            .map(|members| !members.is_empty())
            .unwrap_or(false)
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("Failed to encode {} event: {}", event.name(), e);
            None
        }
    }
}
