//! Error types for the ChatStack client.
//!
//! This module defines the error type shared by the chat session, the
//! backend traits, and the REST client.  The session treats only
//! authentication, join, and exhausted connection errors as fatal; every
//! other kind is reported and absorbed.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

type Source = Arc<dyn error::Error + Send + Sync>;

/// The main error type for the ChatStack client.
#[derive(Clone, Debug)]
pub enum Error {
    /// Credentials were rejected or the login could not be completed.
    Authentication {
        /// Human-readable error message.
        message: String,
    },

    /// The backend refused to let the session join the chatroom.
    Join {
        /// Human-readable error message.
        message: String,
        /// The chatroom that was being joined.
        room: Option<String>,
    },

    /// The realtime connection was lost or could not be opened.
    Connection {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Source>,
    },

    /// A single outgoing message could not be delivered.
    Send {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Source>,
    },

    /// The directory could not resolve a sender.
    Lookup {
        /// Human-readable error message.
        message: String,
        /// The sender identifier that failed to resolve.
        sender_id: String,
    },

    /// Reading from the terminal failed.
    Input {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Source>,
    },

    /// An operation did not complete within its deadline.
    Timeout {
        /// Human-readable error message.
        message: String,
        /// Deadline in seconds.
        seconds: Option<f64>,
    },

    /// A user, conversation, or other backend object does not exist.
    NotFound {
        /// Human-readable error message.
        message: String,
        /// Kind of object, such as `user`.
        resource: Option<String>,
        /// Identifier that was looked up.
        id: Option<String>,
    },

    /// The REST backend answered with an error status.
    Backend {
        /// HTTP status.
        status: u16,
        /// Backend error code from the `{"code": .., "error": ..}` body.
        code: Option<i64>,
        /// The backend's message.
        message: String,
        /// Seconds to wait before retrying, from `Retry-After`.
        retry_after: Option<u64>,
    },

    /// A JSON or YAML document could not be read or written.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Source>,
    },

    /// Local I/O failed.
    Io {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Arc<io::Error>,
    },

    /// The HTTP request could not be made or its response not read.
    Http {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Source>,
    },

    /// The server URL is malformed.
    Url {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<url::ParseError>,
    },

    /// A value failed validation, including illegal session transitions.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Parameter that failed validation.
        param: Option<String>,
    },

    /// Configuration is missing or malformed.
    Config {
        /// Human-readable error message.
        message: String,
    },
}

impl Error {
    /// Creates a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    /// Creates a new join error.
    pub fn join(message: impl Into<String>, room: Option<String>) -> Self {
        Error::Join {
            message: message.into(),
            room,
        }
    }

    /// Creates a new connection error.
    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new send error.
    pub fn send(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Send {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new lookup error.
    pub fn lookup(message: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Error::Lookup {
            message: message.into(),
            sender_id: sender_id.into(),
        }
    }

    /// Creates a new input error.
    pub fn input(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Input {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new timeout error.
    pub fn timeout(message: impl Into<String>, seconds: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            seconds,
        }
    }

    /// Creates a new not found error.
    pub fn not_found(
        message: impl Into<String>,
        resource: Option<String>,
        id: Option<String>,
    ) -> Self {
        Error::NotFound {
            message: message.into(),
            resource,
            id,
        }
    }

    /// Creates an error for a failed REST response.
    pub fn backend(
        status: u16,
        code: Option<i64>,
        message: impl Into<String>,
        retry_after: Option<u64>,
    ) -> Self {
        Error::Backend {
            status,
            code,
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new HTTP error.
    pub fn http(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Http {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Creates a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Converts a backend failure during a join into a join error.
    ///
    /// Authentication and join errors pass through unchanged.
    pub fn into_join(self, room: &str) -> Self {
        match self {
            Error::Join { .. } | Error::Authentication { .. } => self,
            other => Error::join(other.to_string(), Some(room.to_string())),
        }
    }

    /// Returns true if this is an authentication error.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    /// Returns true if this is a join error.
    pub fn is_join(&self) -> bool {
        matches!(self, Error::Join { .. })
    }

    /// Returns true if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// Returns true if this is a send error.
    pub fn is_send(&self) -> bool {
        matches!(self, Error::Send { .. })
    }

    /// Returns true if this is a lookup error.
    pub fn is_lookup(&self) -> bool {
        matches!(self, Error::Lookup { .. })
    }

    /// Returns true if this is an input error.
    pub fn is_input(&self) -> bool {
        matches!(self, Error::Input { .. })
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Returns true if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config { .. })
    }

    /// Returns true if this error ends the chat session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Authentication { .. } | Error::Join { .. } | Error::Connection { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Authentication { message } => write!(f, "Authentication error: {message}"),
            Error::Join {
                message,
                room: Some(room),
            } => write!(f, "Could not join {room}: {message}"),
            Error::Join { message, room: None } => {
                write!(f, "Could not join chatroom: {message}")
            }
            Error::Connection { message, .. } => write!(f, "Connection error: {message}"),
            Error::Send { message, .. } => write!(f, "Send error: {message}"),
            Error::Lookup { message, sender_id } => {
                write!(f, "Lookup error for {sender_id}: {message}")
            }
            Error::Input { message, .. } => write!(f, "Input error: {message}"),
            Error::Timeout { message, seconds } => match seconds {
                Some(seconds) => write!(f, "Timed out after {seconds}s: {message}"),
                None => write!(f, "Timed out: {message}"),
            },
            Error::NotFound {
                message,
                resource,
                id,
            } => {
                match resource {
                    Some(resource) => write!(f, "No such {resource}")?,
                    None => f.write_str("Not found")?,
                }
                if let Some(id) = id {
                    write!(f, " ({id})")?;
                }
                write!(f, ": {message}")
            }
            Error::Backend {
                status,
                code,
                message,
                retry_after,
            } => {
                write!(f, "Backend error {status}: {message}")?;
                if let Some(code) = code {
                    write!(f, " (code {code})")?;
                }
                if let Some(retry_after) = retry_after {
                    write!(f, "; retry after {retry_after}s")?;
                }
                Ok(())
            }
            Error::Serialization { message, .. } => write!(f, "Serialization error: {message}"),
            Error::Io { message, .. } => write!(f, "I/O error: {message}"),
            Error::Http { message, .. } => write!(f, "HTTP error: {message}"),
            Error::Url { message, .. } => write!(f, "URL error: {message}"),
            Error::Validation {
                message,
                param: Some(param),
            } => write!(f, "Validation error: {message} (parameter: {param})"),
            Error::Validation {
                message,
                param: None,
            } => write!(f, "Validation error: {message}"),
            Error::Config { message } => write!(f, "Configuration error: {message}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. }
            | Error::Send { source, .. }
            | Error::Input { source, .. }
            | Error::Serialization { source, .. }
            | Error::Http { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(format!("YAML error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

impl From<rustyline::error::ReadlineError> for Error {
    fn from(err: rustyline::error::ReadlineError) -> Self {
        Error::input(format!("{err}"), Some(Box::new(err)))
    }
}

/// A specialized Result type for ChatStack operations.
pub type Result<T> = std::result::Result<T, Error>;
