// Public modules
pub mod backend;
pub mod chat;
pub mod client;
pub mod error;
pub mod local;
pub mod logging;
pub mod observability;

// Re-exports
pub use backend::{
    Connection, ConnectionEvent, Connector, DEFAULT_ROOM_NAME, Directory, EventStream,
    IncomingMessage, MessageId, RoomRef,
};
pub use chat::{
    ChatConfig, OutgoingIntent, OutputGate, SessionController, SessionState, StopHandle,
};
pub use client::{LeanCloud, User};
pub use error::{Error, Result};
pub use local::{LocalConnection, LocalConnector, LocalHub, TranscriptEntry};
pub use observability::register_biometrics;
