//! Room-Based WebSocket Chat Hub Library
//!
//! A real-time chat hub built with tokio-tungstenite: clients join
//! named rooms, exchange broadcast and private messages, and see live
//! presence and typing state.
//!
//! # Features
//! - WebSocket connection handling
//! - Lazily-created named rooms with bounded message history
//! - Room broadcast and private messaging
//! - Presence (roster snapshots) and typing indicators
//! - Disconnection cleanup
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Engine` is the pure protocol state machine: one inbound event in,
//!   a list of delivery-tagged outbound events out
//! - `ChatServer` is the central actor owning the engine and resolving
//!   delivery targets to per-connection channels
//! - Each connection has a `handler` task communicating with the server
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use chat_hub::{ChatServer, handle_connection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//!     tokio::spawn(ChatServer::new(cmd_rx).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx));
//!     }
//! }
//! ```

pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod registry;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use engine::{Delivery, Engine, Outbound};
pub use error::{AppError, SendError};
pub use event::{ClientEvent, ServerEvent};
pub use handler::handle_connection;
pub use registry::{Session, SessionRegistry};
pub use room::{Message, Room, RoomStore};
pub use server::{ChatServer, ServerCommand};
pub use types::ConnId;
