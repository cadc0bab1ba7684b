use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::session::SessionHandle;

type Members = HashMap<i64, SessionHandle>;

/// Room membership: room id -> (user id -> session).
///
/// Joins and leaves come straight from session read loops while the hub
/// takes fan-out snapshots, so every access goes through the one mutex. The
/// lock is never held across an await.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<i64, Members>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, Members>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds the session to the room, creating the room on first join.
    ///
    /// Joining again with the same session changes nothing and returns
    /// `false`. A different session of the same user replaces the stale one.
    pub fn join(&self, room_id: i64, session: &SessionHandle) -> bool {
        let mut rooms = self.lock();
        let members = rooms.entry(room_id).or_default();

        match members.get(&session.user_id()) {
            Some(existing) if existing.id() == session.id() => false,
            _ => {
                members.insert(session.user_id(), session.clone());
                debug!(room_id, user_id = session.user_id(), "joined room");
                true
            }
        }
    }

    /// Removes the session from the room and drops the room once empty.
    /// A newer session of the same user is left alone.
    pub fn leave(&self, room_id: i64, session: &SessionHandle) -> bool {
        let mut rooms = self.lock();
        let Some(members) = rooms.get_mut(&room_id) else {
            return false;
        };

        let removed = match members.get(&session.user_id()) {
            Some(existing) if existing.id() == session.id() => {
                members.remove(&session.user_id());
                true
            }
            _ => false,
        };

        if members.is_empty() {
            rooms.remove(&room_id);
            debug!(room_id, "room emptied");
        }

        removed
    }

    /// Current members of the room, empty if the room does not exist.
    pub fn snapshot(&self, room_id: i64) -> Vec<SessionHandle> {
        self.lock()
            .get(&room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// User ids in the room, sorted.
    pub fn members(&self, room_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .lock()
            .get(&room_id)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn contains_room(&self, room_id: i64) -> bool {
        self.lock().contains_key(&room_id)
    }

    pub fn room_count(&self) -> usize {
        self.lock().len()
    }
}
