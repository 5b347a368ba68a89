//! Interactive chatroom client.
//!
//! This module provides the terminal chat loop built on the traits in
//! [`crate::backend`]. It supports:
//!
//! - Sending typed lines to the joined room
//! - Printing inbound messages with resolved sender names, in arrival order
//! - Reconnecting with bounded exponential backoff when the connection drops
//! - Printing without corrupting the line being typed
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: the session lifecycle and event dispatch
//! - [`names`]: single-flight display name cache
//! - [`input`]: line input on a dedicated thread
//! - [`render`] and [`console`]: formatting and serialized output
//! - [`commands`]: exit command parsing

mod commands;
mod config;
mod console;
mod input;
mod names;
mod render;
mod session;

pub use commands::{EXIT_COMMAND, OutgoingIntent, QUIT_COMMAND};
pub use config::{
    APP_ID_ENV, APP_KEY_ENV, Alert, AppCredentials, ChatConfig, ChatstackArgs, DEFAULT_PROMPT,
    ReconnectPolicy, SERVER_URL_ENV,
};
pub use console::{BufferConsole, Console, ExternalConsole, OutputGate, StdoutConsole};
pub use input::{BufReadSource, ChannelSource, InputReader, LineSource, RustylineSource};
pub use names::{DisplayNameCache, fallback_name};
pub use render::MessagePrinter;
pub use session::{
    PRESS_ENTER_MESSAGE, Session, SessionController, SessionEvent, SessionState, StopHandle,
    WELCOME_MESSAGE,
};
