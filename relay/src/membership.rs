//! Which WebSocket connections are subscribed to which session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rcommon::SessionId;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::gateway::GatewayFrame;

pub type ClientId = Uuid;
pub type Outbound = UnboundedSender<GatewayFrame>;

type Rooms = HashMap<SessionId, HashMap<ClientId, Outbound>>;

/// Process-wide room table: session -> (client -> outbound channel).
///
/// Empty rooms are dropped as soon as their last member leaves.
#[derive(Clone, Default)]
pub struct Membership {
    rooms: Arc<Mutex<Rooms>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, Rooms> {
        // Entries are plain inserts and removals, so a poisoned map is still consistent.
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` when the client was not already in the room.
    pub fn join(&self, session_id: &SessionId, client_id: ClientId, outbound: Outbound) -> bool {
        self.rooms()
            .entry(session_id.clone())
            .or_default()
            .insert(client_id, outbound)
            .is_none()
    }

    /// Removes the client from every room and returns the sessions it had joined.
    pub fn leave_all(&self, client_id: ClientId) -> Vec<SessionId> {
        let mut rooms = self.rooms();
        let mut left = Vec::new();
        rooms.retain(|session_id, room| {
            if room.remove(&client_id).is_some() {
                left.push(session_id.clone());
            }
            !room.is_empty()
        });
        left.sort();
        left
    }

    pub fn count(&self, session_id: &SessionId) -> usize {
        self.rooms().get(session_id).map_or(0, HashMap::len)
    }

    /// Sends `frame` to every member of the room except `except`. Returns the
    /// number of members it was delivered to.
    pub fn broadcast_except(
        &self,
        session_id: &SessionId,
        except: Option<ClientId>,
        frame: &GatewayFrame,
    ) -> usize {
        let rooms = self.rooms();
        let Some(room) = rooms.get(session_id) else {
            return 0;
        };

        room.iter()
            .filter(|(client_id, _)| Some(**client_id) != except)
            .filter(|(_, outbound)| outbound.send(frame.clone()).is_ok())
            .count()
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("rooms", &self.rooms().len())
            .finish()
    }
}
