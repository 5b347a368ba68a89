//! Output rendering for the chat application.
//!
//! [`MessagePrinter`] turns inbound messages and loop notices into whole
//! blocks and hands them to the [`OutputGate`].  Usernames and notices are
//! optionally styled with ANSI escape codes.

use crate::chat::config::{Alert, ChatConfig};
use crate::chat::console::OutputGate;

/// Terminal bell.
const BEL: &str = "\x07";

/// ANSI escape code for bold text (used for usernames).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for usernames).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for warnings).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for dim text (used for info notices).
const ANSI_DIM: &str = "\x1b[2m";

/// Formats chat output and writes it through the output gate.
pub struct MessagePrinter {
    gate: OutputGate,
    alert: Alert,
    use_color: bool,
    prompt: String,
    reprompt: bool,
}

impl MessagePrinter {
    /// Creates a printer from the session configuration.
    pub fn new(gate: OutputGate, config: &ChatConfig) -> Self {
        Self {
            gate,
            alert: config.alert,
            use_color: config.use_color,
            prompt: config.prompt.clone(),
            reprompt: false,
        }
    }

    /// Controls whether blocks end by re-rendering the prompt.
    ///
    /// Set while input is being read; consoles that redraw the prompt
    /// themselves never get it appended.
    pub fn set_reprompt(&mut self, reprompt: bool) {
        self.reprompt = reprompt;
    }

    /// Prints one inbound message as a single block.
    pub fn print(&self, username: &str, text: &str) {
        let mut block = String::new();
        if self.alert.is_enabled() {
            block.push_str(BEL);
        }
        block.push('\n');
        if self.use_color {
            block.push_str(&format!(
                "* {ANSI_BOLD}{ANSI_CYAN}{username}{ANSI_RESET}: {text}\n"
            ));
        } else {
            block.push_str(&format!("* {username}: {text}\n"));
        }
        self.emit(block);
    }

    /// Prints an informational line.
    pub fn info(&self, info: &str) {
        if self.use_color {
            self.emit(format!("{ANSI_DIM}{info}{ANSI_RESET}\n"));
        } else {
            self.emit(format!("{info}\n"));
        }
    }

    /// Prints a non-fatal warning.
    pub fn warn(&self, warning: &str) {
        if self.use_color {
            self.emit(format!("\n{ANSI_YELLOW}Warning: {warning}{ANSI_RESET}\n"));
        } else {
            self.emit(format!("\nWarning: {warning}\n"));
        }
    }

    /// Prints an error.
    pub fn error(&self, error: &str) {
        if self.use_color {
            self.emit(format!("\n{ANSI_RED}Error: {error}{ANSI_RESET}\n"));
        } else {
            self.emit(format!("\nError: {error}\n"));
        }
    }

    fn emit(&self, mut block: String) {
        if self.reprompt && !self.gate.redraws_prompt() {
            block.push_str(&self.prompt);
        }
        self.gate.emit(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::console::BufferConsole;

    fn printer(config: &ChatConfig) -> (MessagePrinter, BufferConsole) {
        let buffer = BufferConsole::new();
        let gate = OutputGate::new(Box::new(buffer.clone()));
        (MessagePrinter::new(gate, config), buffer)
    }

    #[test]
    fn message_with_alert() {
        let (printer, buffer) = printer(&ChatConfig::new().without_color());
        printer.print("alice", "hi");
        assert_eq!(buffer.blocks(), vec!["\x07\n* alice: hi\n"]);
    }

    #[test]
    fn muted_message() {
        let config = ChatConfig::new()
            .without_color()
            .with_alert(Alert::Disabled);
        let (printer, buffer) = printer(&config);
        printer.print("bob", "hello there");
        assert_eq!(buffer.contents(), "\n* bob: hello there\n");
    }

    #[test]
    fn reprompt_appends_prompt_to_block() {
        let config = ChatConfig::new()
            .without_color()
            .with_alert(Alert::Disabled);
        let (mut printer, buffer) = printer(&config);
        printer.set_reprompt(true);
        printer.print("bob", "x");
        printer.warn("send failed");
        assert_eq!(
            buffer.blocks(),
            vec!["\n* bob: x\n> ", "\nWarning: send failed\n> "]
        );
    }

    #[test]
    fn colored_username() {
        let config = ChatConfig::new().with_alert(Alert::Disabled);
        let (printer, buffer) = printer(&config);
        printer.print("carol", "yo");
        let out = buffer.contents();
        assert!(out.contains(ANSI_CYAN));
        assert!(out.contains("carol"));
        assert!(out.ends_with(": yo\n"));
    }

    #[test]
    fn notices_without_color() {
        let (printer, buffer) = printer(&ChatConfig::new().without_color());
        printer.info("2 people online.");
        printer.error("Could not join ChatStack");
        assert_eq!(
            buffer.contents(),
            "2 people online.\n\nError: Could not join ChatStack\n"
        );
    }
}
