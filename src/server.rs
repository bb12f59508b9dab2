//! ChatServer Actor implementation
//!
//! The central actor owning the engine and the per-connection outbound
//! channels. Uses the Actor pattern with mpsc channels for message
//! passing: one logical event loop processes every inbound event, so no
//! two operations against the same room ever interleave.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{Delivery, Engine, Outbound};
use crate::error::SendError;
use crate::event::{ClientEvent, ServerEvent};
use crate::types::ConnId;

/// Commands sent from connection handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection established
    Connect {
        conn_id: ConnId,
        sender: mpsc::Sender<ServerEvent>,
    },
    /// Connection closed
    Disconnect {
        conn_id: ConnId,
    },
    /// Decoded inbound event from a connection
    Event {
        conn_id: ConnId,
        event: ClientEvent,
    },
}

/// The main ChatServer actor
///
/// Feeds inbound events to the engine and resolves the resulting
/// delivery targets against the live connection map. Targets are
/// resolved after the engine has mutated state, so a room multicast
/// following a leave reaches exactly the remaining members.
pub struct ChatServer {
    /// Protocol state machine
    engine: Engine,
    /// Outbound channel per connection: ConnId -> sender
    conns: HashMap<ConnId, mpsc::Sender<ServerEvent>>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            engine: Engine::new(),
            conns: HashMap::new(),
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders
    /// are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { conn_id, sender } => {
                self.handle_connect(conn_id, sender);
            }
            ServerCommand::Disconnect { conn_id } => {
                self.handle_disconnect(conn_id).await;
            }
            ServerCommand::Event { conn_id, event } => {
                let effects = self.engine.dispatch(conn_id, event);
                self.deliver(effects).await;
            }
        }
    }

    /// Handle new connection
    fn handle_connect(&mut self, conn_id: ConnId, sender: mpsc::Sender<ServerEvent>) {
        info!("Connection {} registered", conn_id);
        self.conns.insert(conn_id, sender);
        debug!(
            "Total connections: {}, sessions: {}, rooms: {}",
            self.conns.len(),
            self.engine.session_count(),
            self.engine.room_count()
        );
    }

    /// Handle connection closure
    async fn handle_disconnect(&mut self, conn_id: ConnId) {
        // Drop the channel first; nothing is addressed to a closed
        // connection anyway.
        self.conns.remove(&conn_id);

        let effects = self.engine.disconnect(conn_id);
        self.deliver(effects).await;

        debug!(
            "Total connections: {}, sessions: {}, rooms: {}",
            self.conns.len(),
            self.engine.session_count(),
            self.engine.room_count()
        );
    }

    /// Resolve delivery targets and push events out
    ///
    /// Delivery is fire-and-forget; a send failure means the recipient
    /// is mid-disconnect and its own Disconnect command will clean up.
    async fn deliver(&self, effects: Vec<Outbound>) {
        for Outbound { target, event } in effects {
            match target {
                Delivery::ToConn(conn_id) => {
                    let _ = self.send_to(conn_id, event).await;
                }
                Delivery::ToRoom(room) => {
                    for conn_id in self.engine.room_members(&room) {
                        let _ = self.send_to(conn_id, event.clone()).await;
                    }
                }
                Delivery::ToRoomExcept(room, except) => {
                    for conn_id in self.engine.room_members(&room) {
                        if conn_id != except {
                            let _ = self.send_to(conn_id, event.clone()).await;
                        }
                    }
                }
            }
        }
    }

    /// Send one event to one connection
    async fn send_to(&self, conn_id: ConnId, event: ServerEvent) -> Result<(), SendError> {
        let Some(sender) = self.conns.get(&conn_id) else {
            return Err(SendError::ChannelClosed);
        };
        sender
            .send(event)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }
}
