//! Parsing of typed input lines into outgoing intents.
//!
//! The chatroom has exactly two commands, `/exit` and `/quit`, matched
//! case-sensitively after trimming.  Every other line, including ones that
//! start with `/`, is chat text and is sent verbatim.

/// Command that leaves the chatroom.
pub const EXIT_COMMAND: &str = "/exit";

/// Alternate spelling of [`EXIT_COMMAND`].
pub const QUIT_COMMAND: &str = "/quit";

/// What the user asked for with one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingIntent {
    /// Send the text to the chatroom.  Blank text is dropped by the session.
    SendText(String),

    /// Leave the chatroom and end the session.
    Terminate,
}

impl OutgoingIntent {
    /// Parses one input line.
    ///
    /// # Examples
    ///
    /// ```
    /// # use chatstack::chat::OutgoingIntent;
    /// assert_eq!(OutgoingIntent::parse("  /quit \n"), OutgoingIntent::Terminate);
    /// assert_eq!(OutgoingIntent::parse("/Quit"), OutgoingIntent::SendText("/Quit".to_string()));
    /// assert_eq!(OutgoingIntent::parse(" hi "), OutgoingIntent::SendText("hi".to_string()));
    /// ```
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line == EXIT_COMMAND || line == QUIT_COMMAND {
            OutgoingIntent::Terminate
        } else {
            OutgoingIntent::SendText(line.to_string())
        }
    }

    /// Returns true for [`OutgoingIntent::Terminate`].
    pub fn is_terminate(&self) -> bool {
        matches!(self, OutgoingIntent::Terminate)
    }

    /// Returns the text to send, or `None` for terminate and blank lines.
    pub fn sendable_text(&self) -> Option<&str> {
        match self {
            OutgoingIntent::SendText(text) if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }
}
