//! Connection registry
//!
//! Maps an active connection to its session (chosen username, current
//! room). Sessions are created on join and destroyed on leave or
//! disconnect; no other component mutates session identity.

use std::collections::HashMap;

use crate::types::{truncate_chars, ConnId};

/// Display name used when a client joins with an empty username
pub const DEFAULT_USERNAME: &str = "Anonymous";

/// Room joined when a client supplies no room name
pub const DEFAULT_ROOM: &str = "General";

/// Maximum display-name length in characters
pub const MAX_USERNAME_LEN: usize = 32;

/// A connection's chosen identity
///
/// Holds the display name and current room. A session belongs to at
/// most one room at a time; the room field is overwritten on re-join.
#[derive(Debug, Clone)]
pub struct Session {
    /// Display name (trimmed, clamped, never empty)
    pub username: String,
    /// Current room name
    pub room: String,
}

/// Registry of all active sessions, keyed by connection ID
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for a connection. Always succeeds.
    pub fn set(&mut self, conn_id: ConnId, username: String, room: String) {
        self.sessions.insert(conn_id, Session { username, room });
    }

    /// Look up a session. Absence is normal control flow (e.g. an event
    /// arriving before the first join), not an error.
    pub fn get(&self, conn_id: ConnId) -> Option<&Session> {
        self.sessions.get(&conn_id)
    }

    /// Remove and return a session. Idempotent; `None` when absent.
    pub fn remove(&mut self, conn_id: ConnId) -> Option<Session> {
        self.sessions.remove(&conn_id)
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Normalize a client-supplied username: trim, default, clamp.
///
/// Invalid input is silently repaired, never rejected.
pub fn normalize_username(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_USERNAME.to_string()
    } else {
        truncate_chars(trimmed, MAX_USERNAME_LEN)
    }
}

/// Normalize a client-supplied room name: trim, default.
pub fn normalize_room(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_ROOM.to_string()
    } else {
        trimmed.to_string()
    }
}
