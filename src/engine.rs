//! Presence & messaging engine
//!
//! The protocol state machine: join, leave, chat, private messages,
//! typing indicators, disconnect cleanup. The engine owns the session
//! registry and the room store, and is deliberately transport-free:
//! every inbound event maps to a list of outbound events tagged with a
//! delivery target, which the transport resolves to actual sends. This
//! keeps all branching directly unit-testable without a socket.

use tracing::info;

use crate::event::{ClientEvent, ServerEvent};
use crate::registry::{normalize_room, normalize_username, Session, SessionRegistry};
use crate::room::{Message, RoomStore, HISTORY_REPLAY};
use crate::types::ConnId;

/// Delivery target of one outbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// One specific connection
    ToConn(ConnId),
    /// Every current member of the named room
    ToRoom(String),
    /// Every current member of the named room except one connection
    ToRoomExcept(String, ConnId),
}

/// An outbound event paired with where to deliver it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub target: Delivery,
    pub event: ServerEvent,
}

impl Outbound {
    fn to_conn(conn_id: ConnId, event: ServerEvent) -> Self {
        Self {
            target: Delivery::ToConn(conn_id),
            event,
        }
    }

    fn to_room(room: String, event: ServerEvent) -> Self {
        Self {
            target: Delivery::ToRoom(room),
            event,
        }
    }

    fn to_room_except(room: String, except: ConnId, event: ServerEvent) -> Self {
        Self {
            target: Delivery::ToRoomExcept(room, except),
            event,
        }
    }
}

fn system(message: String) -> ServerEvent {
    ServerEvent::System { message }
}

/// The room/session state machine
///
/// Constructed once at startup and owned by the server actor. All
/// methods take `&mut self`; the actor's single event loop serializes
/// access, so roster and history read-modify-write sequences never
/// interleave.
#[derive(Debug, Default)]
pub struct Engine {
    registry: SessionRegistry,
    rooms: RoomStore,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one inbound client event
    ///
    /// Returns the outbound events this event produces, in delivery
    /// order. Protocol violations come back as `system` notices to the
    /// sender; nothing here is fatal.
    pub fn dispatch(&mut self, conn_id: ConnId, event: ClientEvent) -> Vec<Outbound> {
        match event {
            ClientEvent::JoinRoom { username, room } => self.handle_join(conn_id, username, room),
            ClientEvent::LeaveRoom => self.handle_leave(conn_id),
            ClientEvent::ChatMessage { text } => self.handle_chat(conn_id, text),
            ClientEvent::Typing => self.handle_typing(conn_id),
            ClientEvent::StopTyping => self.handle_stop_typing(conn_id),
            ClientEvent::PrivateMessage { to, message } => {
                self.handle_private(conn_id, to, message)
            }
        }
    }

    /// Process a connection closure (implicit leave)
    ///
    /// Nothing is addressed to the departed connection; its transport
    /// is already gone.
    pub fn disconnect(&mut self, conn_id: ConnId) -> Vec<Outbound> {
        let Some(Session { username, room }) = self.registry.remove(conn_id) else {
            return Vec::new();
        };

        if let Some(r) = self.rooms.get_room_mut(&room) {
            r.remove_member(conn_id);
        }
        let users = self.roster(&room);

        info!("Connection {} disconnected from room '{}'", conn_id, room);

        vec![
            Outbound::to_room(room.clone(), system(format!("{} has disconnected", username))),
            Outbound::to_room(room, ServerEvent::Users { users }),
        ]
    }

    /// Current member connections of a room, for multicast resolution
    pub fn room_members(&self, room: &str) -> Vec<ConnId> {
        self.rooms
            .get_room(room)
            .map(|r| r.member_ids())
            .unwrap_or_default()
    }

    /// Number of active sessions
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of rooms created so far
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn handle_join(&mut self, conn_id: ConnId, username: String, room: String) -> Vec<Outbound> {
        let username = normalize_username(&username);
        let room = normalize_room(&room);

        // Joining while already joined elsewhere does not leave the old
        // room; that roster entry stays until disconnect. Clients that
        // want to switch rooms cleanly send leaveRoom first.
        self.registry.set(conn_id, username.clone(), room.clone());

        let r = self.rooms.ensure_room(&room);
        r.add_member(conn_id, &username);
        let users = r.roster_names();
        let history = r.recent_history(HISTORY_REPLAY);

        info!("Connection {} joined room '{}' as '{}'", conn_id, room, username);

        vec![
            Outbound::to_conn(
                conn_id,
                ServerEvent::Joined {
                    room: room.clone(),
                    username: username.clone(),
                    users: users.clone(),
                    history,
                },
            ),
            Outbound::to_room_except(
                room.clone(),
                conn_id,
                system(format!("{} has joined the room", username)),
            ),
            Outbound::to_room(room, ServerEvent::Users { users }),
        ]
    }

    fn handle_leave(&mut self, conn_id: ConnId) -> Vec<Outbound> {
        // No session, nothing to leave: no-op with no observable output
        let Some(Session { username, room }) = self.registry.remove(conn_id) else {
            return Vec::new();
        };

        if let Some(r) = self.rooms.get_room_mut(&room) {
            r.remove_member(conn_id);
        }
        let users = self.roster(&room);

        info!("Connection {} left room '{}'", conn_id, room);

        vec![
            Outbound::to_conn(
                conn_id,
                ServerEvent::Left {
                    room: room.clone(),
                    username: username.clone(),
                },
            ),
            Outbound::to_room(room.clone(), system(format!("{} has left the room", username))),
            Outbound::to_room(room, ServerEvent::Users { users }),
        ]
    }

    fn handle_chat(&mut self, conn_id: ConnId, text: String) -> Vec<Outbound> {
        let Some(session) = self.registry.get(conn_id) else {
            return vec![Outbound::to_conn(
                conn_id,
                system("Please join a room first".to_string()),
            )];
        };

        let room = session.room.clone();
        let msg = Message::new(&session.username, &text);

        self.rooms.ensure_room(&room).append_history(msg.clone());

        vec![Outbound::to_room(
            room,
            ServerEvent::Message {
                username: msg.username,
                text: msg.text,
                ts: msg.ts,
            },
        )]
    }

    fn handle_typing(&mut self, conn_id: ConnId) -> Vec<Outbound> {
        // Typing before joining is silently dropped, not an error
        match self.registry.get(conn_id) {
            Some(session) => vec![Outbound::to_room(
                session.room.clone(),
                ServerEvent::Typing {
                    username: session.username.clone(),
                },
            )],
            None => Vec::new(),
        }
    }

    fn handle_stop_typing(&mut self, conn_id: ConnId) -> Vec<Outbound> {
        match self.registry.get(conn_id) {
            Some(session) => vec![Outbound::to_room(
                session.room.clone(),
                ServerEvent::StopTyping,
            )],
            None => Vec::new(),
        }
    }

    fn handle_private(&mut self, conn_id: ConnId, to: String, message: String) -> Vec<Outbound> {
        let Some(session) = self.registry.get(conn_id) else {
            return vec![Outbound::to_conn(
                conn_id,
                system("Join a room first".to_string()),
            )];
        };

        let Some(room) = self.rooms.get_room(&session.room) else {
            return vec![Outbound::to_conn(
                conn_id,
                system("Room not found".to_string()),
            )];
        };

        // First roster match in join order. Duplicate display names are
        // allowed, so the earliest joiner with that name receives it.
        let Some(target) = room.resolve_member(&to) else {
            return vec![Outbound::to_conn(
                conn_id,
                system(format!("User not found in room: {}", to)),
            )];
        };

        // Private messages are never appended to room history
        let msg = Message::new(&session.username, &message);

        vec![
            Outbound::to_conn(
                target,
                ServerEvent::PrivateMessage {
                    from: msg.username,
                    message: msg.text,
                    ts: msg.ts,
                },
            ),
            Outbound::to_conn(conn_id, system(format!("Private message sent to {}", to))),
        ]
    }

    fn roster(&self, room: &str) -> Vec<String> {
        self.rooms
            .get_room(room)
            .map(|r| r.roster_names())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::{MAX_HISTORY, MAX_TEXT_LEN};

    fn join(engine: &mut Engine, conn_id: ConnId, username: &str, room: &str) -> Vec<Outbound> {
        engine.dispatch(
            conn_id,
            ClientEvent::JoinRoom {
                username: username.to_string(),
                room: room.to_string(),
            },
        )
    }

    fn chat(engine: &mut Engine, conn_id: ConnId, text: &str) -> Vec<Outbound> {
        engine.dispatch(
            conn_id,
            ClientEvent::ChatMessage {
                text: text.to_string(),
            },
        )
    }

    fn private(engine: &mut Engine, conn_id: ConnId, to: &str, message: &str) -> Vec<Outbound> {
        engine.dispatch(
            conn_id,
            ClientEvent::PrivateMessage {
                to: to.to_string(),
                message: message.to_string(),
            },
        )
    }

    #[test]
    fn test_first_join_snapshot() {
        let mut engine = Engine::new();
        let a = ConnId::new();

        let out = join(&mut engine, a, "alice", "General");

        assert_eq!(out.len(), 3);
        assert_eq!(
            out[0],
            Outbound {
                target: Delivery::ToConn(a),
                event: ServerEvent::Joined {
                    room: "General".to_string(),
                    username: "alice".to_string(),
                    users: vec!["alice".to_string()],
                    history: vec![],
                },
            }
        );
        assert_eq!(
            out[1],
            Outbound {
                target: Delivery::ToRoomExcept("General".to_string(), a),
                event: ServerEvent::System {
                    message: "alice has joined the room".to_string(),
                },
            }
        );
        assert_eq!(
            out[2],
            Outbound {
                target: Delivery::ToRoom("General".to_string()),
                event: ServerEvent::Users {
                    users: vec!["alice".to_string()],
                },
            }
        );
    }

    #[test]
    fn test_second_join_updates_roster() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        let b = ConnId::new();

        join(&mut engine, a, "alice", "General");
        let out = join(&mut engine, b, "bob", "General");

        // Joiner sees the full roster including themselves
        match &out[0].event {
            ServerEvent::Joined { users, .. } => {
                assert_eq!(users, &vec!["alice".to_string(), "bob".to_string()]);
            }
            other => panic!("expected Joined, got {:?}", other),
        }
        // Existing members get the notice, but not the joiner
        assert_eq!(
            out[1].target,
            Delivery::ToRoomExcept("General".to_string(), b)
        );
        assert_eq!(
            out[1].event,
            ServerEvent::System {
                message: "bob has joined the room".to_string(),
            }
        );
        // Roster snapshot goes to everyone
        assert_eq!(
            out[2],
            Outbound {
                target: Delivery::ToRoom("General".to_string()),
                event: ServerEvent::Users {
                    users: vec!["alice".to_string(), "bob".to_string()],
                },
            }
        );
    }

    #[test]
    fn test_join_normalizes_identity() {
        let mut engine = Engine::new();
        let a = ConnId::new();

        let out = join(&mut engine, a, "   ", "");

        match &out[0].event {
            ServerEvent::Joined { room, username, .. } => {
                assert_eq!(username, "Anonymous");
                assert_eq!(room, "General");
            }
            other => panic!("expected Joined, got {:?}", other),
        }
    }

    #[test]
    fn test_rejoin_other_room_keeps_old_roster_entry() {
        // Known protocol quirk: joining a second room without leaving the
        // first leaves the old roster entry in place until disconnect.
        let mut engine = Engine::new();
        let a = ConnId::new();

        join(&mut engine, a, "alice", "first");
        join(&mut engine, a, "alice", "second");

        assert_eq!(engine.room_members("first"), vec![a]);
        assert_eq!(engine.room_members("second"), vec![a]);
        // The session itself tracks only the newest room
        assert_eq!(engine.registry.get(a).unwrap().room, "second");
    }

    #[test]
    fn test_chat_broadcasts_to_room() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        let b = ConnId::new();
        join(&mut engine, a, "alice", "General");
        join(&mut engine, b, "bob", "General");

        let out = chat(&mut engine, a, "hi");

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, Delivery::ToRoom("General".to_string()));
        match &out[0].event {
            ServerEvent::Message { username, text, ts } => {
                assert_eq!(username, "alice");
                assert_eq!(text, "hi");
                assert!(*ts > 0);
            }
            other => panic!("expected Message, got {:?}", other),
        }
        assert_eq!(
            engine.rooms.get_room("General").unwrap().history_len(),
            1
        );
    }

    #[test]
    fn test_chat_round_trip_history() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        join(&mut engine, a, "alice", "General");

        let t0 = chrono::Utc::now().timestamp_millis();
        chat(&mut engine, a, "hello there");

        let history = engine.rooms.get_room("General").unwrap().recent_history(50);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].username, "alice");
        assert_eq!(history[0].text, "hello there");
        assert!(history[0].ts >= t0);
    }

    #[test]
    fn test_chat_text_truncated() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        join(&mut engine, a, "alice", "General");

        let long = "y".repeat(MAX_TEXT_LEN + 100);
        let out = chat(&mut engine, a, &long);

        match &out[0].event {
            ServerEvent::Message { text, .. } => {
                assert_eq!(text.chars().count(), MAX_TEXT_LEN);
            }
            other => panic!("expected Message, got {:?}", other),
        }
        let history = engine.rooms.get_room("General").unwrap().recent_history(1);
        assert_eq!(history[0].text.chars().count(), MAX_TEXT_LEN);
    }

    #[test]
    fn test_chat_before_join_rejected() {
        let mut engine = Engine::new();
        let c = ConnId::new();

        let out = chat(&mut engine, c, "x");

        assert_eq!(
            out,
            vec![Outbound {
                target: Delivery::ToConn(c),
                event: ServerEvent::System {
                    message: "Please join a room first".to_string(),
                },
            }]
        );
        // Nothing was broadcast and no room sprang into existence
        assert_eq!(engine.room_count(), 0);
    }

    #[test]
    fn test_leave_removes_and_notifies() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        let b = ConnId::new();
        join(&mut engine, a, "alice", "General");
        join(&mut engine, b, "bob", "General");

        let out = engine.dispatch(a, ClientEvent::LeaveRoom);

        assert_eq!(
            out[0],
            Outbound {
                target: Delivery::ToConn(a),
                event: ServerEvent::Left {
                    room: "General".to_string(),
                    username: "alice".to_string(),
                },
            }
        );
        assert_eq!(
            out[1],
            Outbound {
                target: Delivery::ToRoom("General".to_string()),
                event: ServerEvent::System {
                    message: "alice has left the room".to_string(),
                },
            }
        );
        assert_eq!(
            out[2],
            Outbound {
                target: Delivery::ToRoom("General".to_string()),
                event: ServerEvent::Users {
                    users: vec!["bob".to_string()],
                },
            }
        );
        // The leaver no longer resolves as a multicast target
        assert_eq!(engine.room_members("General"), vec![b]);
        assert_eq!(engine.session_count(), 1);
    }

    #[test]
    fn test_leave_without_session_no_effects() {
        let mut engine = Engine::new();
        let c = ConnId::new();

        assert!(engine.dispatch(c, ClientEvent::LeaveRoom).is_empty());
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        join(&mut engine, a, "alice", "General");

        assert_eq!(engine.dispatch(a, ClientEvent::LeaveRoom).len(), 3);
        assert!(engine.dispatch(a, ClientEvent::LeaveRoom).is_empty());
    }

    #[test]
    fn test_typing_broadcasts() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        join(&mut engine, a, "alice", "General");

        let out = engine.dispatch(a, ClientEvent::Typing);

        assert_eq!(
            out,
            vec![Outbound {
                target: Delivery::ToRoom("General".to_string()),
                event: ServerEvent::Typing {
                    username: "alice".to_string(),
                },
            }]
        );
    }

    #[test]
    fn test_stop_typing_broadcasts() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        join(&mut engine, a, "alice", "General");

        let out = engine.dispatch(a, ClientEvent::StopTyping);

        assert_eq!(
            out,
            vec![Outbound {
                target: Delivery::ToRoom("General".to_string()),
                event: ServerEvent::StopTyping,
            }]
        );
    }

    #[test]
    fn test_typing_before_join_ignored() {
        let mut engine = Engine::new();
        let c = ConnId::new();

        assert!(engine.dispatch(c, ClientEvent::Typing).is_empty());
        assert!(engine.dispatch(c, ClientEvent::StopTyping).is_empty());
    }

    #[test]
    fn test_private_message_delivery() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        let b = ConnId::new();
        join(&mut engine, a, "alice", "General");
        join(&mut engine, b, "bob", "General");
        chat(&mut engine, a, "hi");

        let out = private(&mut engine, a, "bob", "secret");

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].target, Delivery::ToConn(b));
        match &out[0].event {
            ServerEvent::PrivateMessage { from, message, ts } => {
                assert_eq!(from, "alice");
                assert_eq!(message, "secret");
                assert!(*ts > 0);
            }
            other => panic!("expected PrivateMessage, got {:?}", other),
        }
        assert_eq!(
            out[1],
            Outbound {
                target: Delivery::ToConn(a),
                event: ServerEvent::System {
                    message: "Private message sent to bob".to_string(),
                },
            }
        );
        // Room history is untouched by private traffic
        assert_eq!(engine.rooms.get_room("General").unwrap().history_len(), 1);
    }

    #[test]
    fn test_private_message_unknown_user() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        join(&mut engine, a, "alice", "General");

        let out = private(&mut engine, a, "carol", "hello?");

        assert_eq!(
            out,
            vec![Outbound {
                target: Delivery::ToConn(a),
                event: ServerEvent::System {
                    message: "User not found in room: carol".to_string(),
                },
            }]
        );
    }

    #[test]
    fn test_private_message_before_join() {
        let mut engine = Engine::new();
        let c = ConnId::new();

        let out = private(&mut engine, c, "bob", "psst");

        assert_eq!(
            out,
            vec![Outbound {
                target: Delivery::ToConn(c),
                event: ServerEvent::System {
                    message: "Join a room first".to_string(),
                },
            }]
        );
    }

    #[test]
    fn test_private_message_duplicate_names_first_match() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        let bob1 = ConnId::new();
        let bob2 = ConnId::new();
        join(&mut engine, a, "alice", "General");
        join(&mut engine, bob1, "bob", "General");
        join(&mut engine, bob2, "bob", "General");

        let out = private(&mut engine, a, "bob", "which one?");

        // Earliest joiner with the name wins
        assert_eq!(out[0].target, Delivery::ToConn(bob1));
    }

    #[test]
    fn test_disconnect_notifies_room() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        let b = ConnId::new();
        join(&mut engine, a, "alice", "General");
        join(&mut engine, b, "bob", "General");

        let out = engine.disconnect(a);

        assert_eq!(
            out,
            vec![
                Outbound {
                    target: Delivery::ToRoom("General".to_string()),
                    event: ServerEvent::System {
                        message: "alice has disconnected".to_string(),
                    },
                },
                Outbound {
                    target: Delivery::ToRoom("General".to_string()),
                    event: ServerEvent::Users {
                        users: vec!["bob".to_string()],
                    },
                },
            ]
        );
        // Session is gone; a later message from the same ID is unjoined
        let late = chat(&mut engine, a, "ghost");
        assert_eq!(
            late[0].event,
            ServerEvent::System {
                message: "Please join a room first".to_string(),
            }
        );
    }

    #[test]
    fn test_disconnect_without_session_silent() {
        let mut engine = Engine::new();
        let c = ConnId::new();

        assert!(engine.disconnect(c).is_empty());
    }

    #[test]
    fn test_history_eviction_through_engine() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        join(&mut engine, a, "alice", "General");

        for i in 0..MAX_HISTORY + 1 {
            chat(&mut engine, a, &format!("msg {}", i));
        }

        let room = engine.rooms.get_room("General").unwrap();
        assert_eq!(room.history_len(), MAX_HISTORY);
        assert_eq!(room.recent_history(MAX_HISTORY)[0].text, "msg 1");
    }

    #[test]
    fn test_join_replays_recent_history() {
        let mut engine = Engine::new();
        let a = ConnId::new();
        let b = ConnId::new();
        join(&mut engine, a, "alice", "General");

        for i in 0..60 {
            chat(&mut engine, a, &format!("msg {}", i));
        }

        let out = join(&mut engine, b, "bob", "General");
        match &out[0].event {
            ServerEvent::Joined { history, .. } => {
                assert_eq!(history.len(), HISTORY_REPLAY);
                assert_eq!(history[0].text, "msg 10");
                assert_eq!(history[HISTORY_REPLAY - 1].text, "msg 59");
            }
            other => panic!("expected Joined, got {:?}", other),
        }
    }

    #[test]
    fn test_roster_broadcast_tracks_membership() {
        // The roster snapshot always reflects exactly the sessions
        // currently associated with the room, across joins and leaves.
        let mut engine = Engine::new();
        let a = ConnId::new();
        let b = ConnId::new();
        let c = ConnId::new();

        join(&mut engine, a, "alice", "General");
        join(&mut engine, b, "bob", "General");
        let out = join(&mut engine, c, "carol", "General");
        match &out[2].event {
            ServerEvent::Users { users } => {
                assert_eq!(users, &vec!["alice", "bob", "carol"]);
            }
            other => panic!("expected Users, got {:?}", other),
        }

        let out = engine.dispatch(b, ClientEvent::LeaveRoom);
        match &out[2].event {
            ServerEvent::Users { users } => {
                assert_eq!(users, &vec!["alice", "carol"]);
            }
            other => panic!("expected Users, got {:?}", other),
        }

        let out = engine.disconnect(a);
        match &out[1].event {
            ServerEvent::Users { users } => {
                assert_eq!(users, &vec!["carol"]);
            }
            other => panic!("expected Users, got {:?}", other),
        }
        assert_eq!(engine.session_count(), 1);
        assert_eq!(engine.room_members("General"), vec![c]);
    }
}
