//! Serialized terminal output.
//!
//! Every line the client prints goes through one [`OutputGate`].  The gate
//! owns the active [`Console`] behind a mutex and writes each block whole, so
//! a received message never interleaves with a notice or the prompt.  When
//! the input thread runs a line editor it installs the editor's external
//! printer, which redraws the prompt and any partially typed line.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Destination for printed blocks.
pub trait Console: Send {
    /// Writes one block of text.
    fn print(&mut self, text: String) -> io::Result<()>;

    /// Returns true when this console restores the prompt itself.
    fn redraws_prompt(&self) -> bool {
        false
    }
}

/// Writes to standard output, flushing after each block.
#[derive(Debug, Default)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn print(&mut self, text: String) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    }
}

/// Prints above the line being edited through a rustyline external printer.
pub struct ExternalConsole {
    printer: Box<dyn rustyline::ExternalPrinter + Send>,
}

impl ExternalConsole {
    /// Wraps a printer obtained from `Editor::create_external_printer`.
    pub fn new(printer: Box<dyn rustyline::ExternalPrinter + Send>) -> Self {
        Self { printer }
    }
}

impl Console for ExternalConsole {
    fn print(&mut self, text: String) -> io::Result<()> {
        self.printer
            .print(text)
            .map_err(|err| io::Error::other(err.to_string()))
    }

    fn redraws_prompt(&self) -> bool {
        true
    }
}

/// Collects blocks in memory.  Clones share the buffer.
#[derive(Clone, Debug, Default)]
pub struct BufferConsole {
    blocks: Arc<Mutex<Vec<String>>>,
}

impl BufferConsole {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything printed so far, concatenated.
    pub fn contents(&self) -> String {
        self.lock().concat()
    }

    /// Each printed block in order.
    pub fn blocks(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Console for BufferConsole {
    fn print(&mut self, text: String) -> io::Result<()> {
        self.lock().push(text);
        Ok(())
    }
}

/// The one place terminal output goes through.
#[derive(Clone)]
pub struct OutputGate {
    console: Arc<Mutex<Box<dyn Console>>>,
}

impl OutputGate {
    /// Creates a gate writing to `console`.
    pub fn new(console: Box<dyn Console>) -> Self {
        Self {
            console: Arc::new(Mutex::new(console)),
        }
    }

    /// Creates a gate writing to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(StdoutConsole))
    }

    /// Replaces the active console; later blocks go to `console`.
    pub fn install(&self, console: Box<dyn Console>) {
        *self.lock() = console;
    }

    /// Writes `text` as one uninterrupted block.
    pub fn emit(&self, text: String) {
        let mut console = self.lock();
        if let Err(err) = console.print(text) {
            tracing::warn!(error = %err, "failed to write to console");
        }
    }

    /// Returns true when the active console restores the prompt itself.
    pub fn redraws_prompt(&self) -> bool {
        self.lock().redraws_prompt()
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Console>> {
        self.console.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OutputGate {
    fn default() -> Self {
        Self::stdout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Redrawing(BufferConsole);

    impl Console for Redrawing {
        fn print(&mut self, text: String) -> io::Result<()> {
            self.0.print(text)
        }

        fn redraws_prompt(&self) -> bool {
            true
        }
    }

    #[test]
    fn blocks_are_kept_whole() {
        let buffer = BufferConsole::new();
        let gate = OutputGate::new(Box::new(buffer.clone()));
        gate.emit("\n* a: one\n".to_string());
        gate.emit("\n* b: two\n".to_string());
        assert_eq!(buffer.blocks(), vec!["\n* a: one\n", "\n* b: two\n"]);
        assert_eq!(buffer.contents(), "\n* a: one\n\n* b: two\n");
    }

    #[test]
    fn install_swaps_console() {
        let first = BufferConsole::new();
        let second = BufferConsole::new();
        let gate = OutputGate::new(Box::new(first.clone()));
        assert!(!gate.redraws_prompt());
        gate.emit("before".to_string());
        gate.install(Box::new(Redrawing(second.clone())));
        gate.emit("after".to_string());
        assert!(gate.redraws_prompt());
        assert_eq!(first.contents(), "before");
        assert_eq!(second.contents(), "after");
    }

    #[test]
    fn concurrent_emits_do_not_interleave() {
        let buffer = BufferConsole::new();
        let gate = OutputGate::new(Box::new(buffer.clone()));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        gate.emit(format!("\n* t{t}: line {i}\n"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let blocks = buffer.blocks();
        assert_eq!(blocks.len(), 400);
        for block in blocks {
            assert!(block.starts_with("\n* t"));
            assert!(block.ends_with('\n'));
            assert_eq!(block.matches('\n').count(), 2);
        }
    }
}
