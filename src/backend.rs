//! Seams between the chat session and the messaging backend.
//!
//! The session never speaks a wire protocol itself.  It opens connections
//! through a [`Connector`], joins and sends through a [`Connection`], reads
//! pushed events from the receiver returned by [`Connection::subscribe`], and
//! resolves sender names through a [`Directory`].

use std::fmt;

use tokio::sync::mpsc;

use crate::error::Result;

/// The chatroom every ChatStack session joins.
pub const DEFAULT_ROOM_NAME: &str = "ChatStack";

/// Reference to a chatroom on the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoomRef {
    /// Backend identifier of the conversation.
    pub id: String,
    /// Human-readable name of the conversation.
    pub name: String,
}

impl RoomRef {
    /// Creates a room reference.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RoomRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Identifier the backend assigned to a sent message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A text message pushed by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Client identifier of the sender.
    pub sender_id: String,
    /// Message body.
    pub text: String,
    /// Backend delivery order.
    pub sequence: u64,
}

/// Events pushed by a connection, in delivery order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A text message arrived in the joined room.
    Message(IncomingMessage),
    /// The backend dropped the connection.
    Disconnected {
        /// Why the connection went away.
        reason: String,
    },
}

/// Ordered stream of pushed events.  A closed channel means the connection
/// is gone.
pub type EventStream = mpsc::UnboundedReceiver<ConnectionEvent>;

/// An authenticated realtime connection.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Joins `room` and returns the member count reported by the join.
    async fn join(&mut self, room: &RoomRef) -> Result<u64>;

    /// Sends a text message to the joined room.
    async fn send(&mut self, text: &str) -> Result<MessageId>;

    /// Returns the number of members currently in the joined room.
    async fn members_count(&self) -> Result<u64>;

    /// Takes the pushed-event receiver.  Only the first call succeeds.
    fn subscribe(&mut self) -> Result<EventStream>;

    /// Closes the connection.  The event stream ends afterwards.
    async fn close(&mut self);
}

/// Opens realtime connections; used for the first connection and reconnects.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Opens a fresh authenticated connection.
    async fn open(&self) -> Result<Box<dyn Connection>>;
}

/// Resolves sender identifiers to display names.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Returns the username registered for `sender_id`.
    async fn username(&self, sender_id: &str) -> Result<String>;
}
