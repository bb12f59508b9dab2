//! Wire protocol definitions
//!
//! JSON-based bidirectional event protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. Event names are
//! camelCase on the wire (`joinRoom`, `chatMessage`, ...).

use serde::{Deserialize, Serialize};

use crate::room::Message;

/// Client → Server event
///
/// All events from client to server. Uses tagged enum with camelCase naming.
/// String payloads are taken as-is here; trimming, defaulting and length
/// clamping happen in the engine, never at the codec.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join a named room (both fields optional; empty values fall back
    /// to the engine defaults)
    JoinRoom {
        #[serde(default)]
        username: String,
        #[serde(default)]
        room: String,
    },
    /// Leave the current room
    LeaveRoom,
    /// Send a chat message to the current room
    ChatMessage { text: String },
    /// Indicate typing started
    Typing,
    /// Indicate typing stopped
    StopTyping,
    /// Send a private message to a named user in the current room
    PrivateMessage { to: String, message: String },
}

/// Server → Client event
///
/// All events from server to client. Uses tagged enum with camelCase naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Join acknowledged: room snapshot for the new member
    Joined {
        room: String,
        username: String,
        users: Vec<String>,
        history: Vec<Message>,
    },
    /// Leave acknowledged
    Left { room: String, username: String },
    /// Chat message broadcast to a room
    Message {
        username: String,
        text: String,
        ts: i64,
    },
    /// Informational or error notice
    System { message: String },
    /// Full roster snapshot, sent after every membership change
    Users { users: Vec<String> },
    /// A member started typing
    Typing { username: String },
    /// A member stopped typing
    StopTyping,
    /// Private message delivered to one recipient
    PrivateMessage {
        from: String,
        message: String,
        ts: i64,
    },
}
