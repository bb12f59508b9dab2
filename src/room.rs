//! Room and room store definitions
//!
//! A room is a named, lazily-created channel with a member roster and a
//! bounded message history. Rooms are created on first join and kept for
//! the lifetime of the process.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use serde::Serialize;

use crate::types::{truncate_chars, ConnId};

/// Messages retained per room; the oldest entry is evicted past this
pub const MAX_HISTORY: usize = 200;

/// Messages replayed to a joining client
pub const HISTORY_REPLAY: usize = 50;

/// Maximum message body length in characters
pub const MAX_TEXT_LEN: usize = 1000;

/// Current Unix timestamp in milliseconds
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single chat message
///
/// Immutable once created. The timestamp is assigned by the engine at
/// receipt time, never taken from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Author display name
    pub username: String,
    /// Body, clamped to [`MAX_TEXT_LEN`] characters
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub ts: i64,
}

impl Message {
    /// Build a message stamped with the current time
    pub fn new(username: &str, text: &str) -> Self {
        Self {
            username: username.to_string(),
            text: truncate_chars(text, MAX_TEXT_LEN),
            ts: now_ms(),
        }
    }
}

/// A chat room: insertion-ordered roster plus bounded history
#[derive(Debug)]
pub struct Room {
    /// Room name (case-sensitive)
    pub name: String,
    /// Members as (connection, display name), in join order. Join order
    /// is what makes private-message resolution deterministic when two
    /// members share a display name.
    members: Vec<(ConnId, String)>,
    /// Most recent messages, oldest first
    history: VecDeque<Message>,
}

impl Room {
    /// Create an empty room with the given name
    pub fn new(name: String) -> Self {
        Self {
            name,
            members: Vec::new(),
            history: VecDeque::new(),
        }
    }

    /// Add a member, or update their display name if already present
    pub fn add_member(&mut self, conn_id: ConnId, username: &str) {
        match self.members.iter_mut().find(|(id, _)| *id == conn_id) {
            Some((_, name)) => *name = username.to_string(),
            None => self.members.push((conn_id, username.to_string())),
        }
    }

    /// Remove a member. Idempotent; unknown connections are a no-op.
    pub fn remove_member(&mut self, conn_id: ConnId) {
        self.members.retain(|(id, _)| *id != conn_id);
    }

    /// Check whether a connection is a member of this room
    pub fn contains(&self, conn_id: ConnId) -> bool {
        self.members.iter().any(|(id, _)| *id == conn_id)
    }

    /// Resolve a display name to the first matching member in join order
    pub fn resolve_member(&self, username: &str) -> Option<ConnId> {
        self.members
            .iter()
            .find(|(_, name)| name == username)
            .map(|(id, _)| *id)
    }

    /// Snapshot of member display names, in join order
    pub fn roster_names(&self) -> Vec<String> {
        self.members.iter().map(|(_, name)| name.clone()).collect()
    }

    /// Snapshot of member connection IDs, in join order
    pub fn member_ids(&self) -> Vec<ConnId> {
        self.members.iter().map(|(id, _)| *id).collect()
    }

    /// Number of members in the room
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Append a message, evicting the oldest past [`MAX_HISTORY`]
    pub fn append_history(&mut self, message: Message) {
        self.history.push_back(message);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// The last `n` messages at most, oldest first
    pub fn recent_history(&self, n: usize) -> Vec<Message> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Number of messages currently retained
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// Store of all rooms, keyed by name
///
/// Rooms are created lazily on first join and never deleted.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<String, Room>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the named room, creating an empty one if absent. Never fails.
    pub fn ensure_room(&mut self, name: &str) -> &mut Room {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name.to_string()))
    }

    pub fn get_room(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn get_room_mut(&mut self, name: &str) -> Option<&mut Room> {
        self.rooms.get_mut(name)
    }

    /// Number of rooms created so far
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
