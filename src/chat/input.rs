//! Line input on a dedicated thread.
//!
//! Reading from a terminal blocks, so the [`InputReader`] owns its
//! [`LineSource`] on an OS thread named `chatstack-input` and forwards one
//! [`OutgoingIntent`] per line into the session's event channel.  The thread
//! ends after forwarding `Terminate`; end of input, input errors, and Ctrl+C
//! at the prompt all count as `Terminate`.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::{mpsc, oneshot};

use crate::chat::commands::OutgoingIntent;
use crate::chat::console::{Console, ExternalConsole, OutputGate, StdoutConsole};
use crate::chat::session::SessionEvent;
use crate::error::{Error, Result};

const THREAD_NAME: &str = "chatstack-input";

/// A blocking source of input lines.
pub trait LineSource {
    /// Reads one line.  `None` means the input ended.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Returns true when the source draws `prompt` itself.
    fn renders_prompt(&self) -> bool {
        false
    }

    /// A console that prints without corrupting the line being edited.
    fn external_console(&mut self) -> Option<Box<dyn Console>> {
        None
    }
}

/// Interactive line editing on a terminal.
pub struct RustylineSource {
    editor: DefaultEditor,
}

impl RustylineSource {
    /// Creates an editor attached to the terminal.
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for RustylineSource {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn renders_prompt(&self) -> bool {
        true
    }

    fn external_console(&mut self) -> Option<Box<dyn Console>> {
        match self.editor.create_external_printer() {
            Ok(printer) => Some(Box::new(ExternalConsole::new(Box::new(printer)))),
            Err(err) => {
                tracing::debug!(error = %err, "external printer unavailable");
                None
            }
        }
    }
}

/// Lines from any buffered reader, such as piped stdin.
pub struct BufReadSource<R> {
    reader: R,
}

impl<R: BufRead> BufReadSource<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for BufReadSource<R> {
    fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|err| Error::io("failed to read input", err))?;
        if read == 0 { Ok(None) } else { Ok(Some(line)) }
    }
}

/// Lines pushed through a channel.  Dropping the sender ends the input.
pub struct ChannelSource {
    lines: std_mpsc::Receiver<String>,
}

impl ChannelSource {
    /// Creates a source and the sender that feeds it.
    pub fn new() -> (std_mpsc::Sender<String>, Self) {
        let (tx, rx) = std_mpsc::channel();
        (tx, Self { lines: rx })
    }
}

impl LineSource for ChannelSource {
    fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        Ok(self.lines.recv().ok())
    }
}

/// Handle to the input thread.
pub struct InputReader {
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    done: Option<oneshot::Receiver<()>>,
}

impl InputReader {
    /// Opens a source on a new input thread and starts forwarding lines.
    ///
    /// `open` runs on the input thread, so the source never has to cross
    /// threads.  Returns once the source is open and, for a line editor, its
    /// external printer is installed in `gate`.
    pub async fn spawn<F, S>(
        open: F,
        events: mpsc::UnboundedSender<SessionEvent>,
        gate: OutputGate,
        prompt: String,
    ) -> Result<Self>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
        S: LineSource + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (done_tx, done_rx) = oneshot::channel();

        let thread_stop = Arc::clone(&stop);
        let thread_finished = Arc::clone(&finished);
        std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let mut source = match open() {
                    Ok(source) => source,
                    Err(err) => {
                        thread_finished.store(true, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(err));
                        let _ = done_tx.send(());
                        return;
                    }
                };
                let external = source.external_console();
                let installed = external.is_some();
                if let Some(console) = external {
                    gate.install(console);
                }
                let _ = ready_tx.send(Ok(()));

                read_lines(&mut source, &events, &gate, &prompt, &thread_stop);

                if installed {
                    gate.install(Box::new(StdoutConsole));
                }
                thread_finished.store(true, Ordering::SeqCst);
                tracing::debug!("input thread finished");
                let _ = done_tx.send(());
            })
            .map_err(|err| Error::io("failed to spawn input thread", err))?;

        ready_rx
            .await
            .map_err(|_| Error::input("input thread exited before it was ready", None))??;

        Ok(Self {
            stop,
            finished,
            done: Some(done_rx),
        })
    }

    /// Returns true once the thread has stopped reading.
    pub fn has_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Asks the thread to stop and waits for it.
    ///
    /// A thread blocked on a read stops after that read returns; the line it
    /// returns is discarded.
    pub async fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(done) = self.done.take() {
            let _ = done.await;
        }
    }
}

fn read_lines<S: LineSource>(
    source: &mut S,
    events: &mpsc::UnboundedSender<SessionEvent>,
    gate: &OutputGate,
    prompt: &str,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::SeqCst) {
        if !source.renders_prompt() {
            gate.emit(prompt.to_string());
        }
        let intent = match source.read_line(prompt) {
            Ok(Some(line)) => OutgoingIntent::parse(&line),
            Ok(None) => {
                tracing::info!("input ended");
                OutgoingIntent::Terminate
            }
            Err(err) => {
                tracing::warn!(error = %err, "input failed");
                OutgoingIntent::Terminate
            }
        };
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let terminate = intent.is_terminate();
        if events.send(SessionEvent::Input(intent)).is_err() || terminate {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::chat::console::BufferConsole;

    fn gate() -> (OutputGate, BufferConsole) {
        let buffer = BufferConsole::new();
        (OutputGate::new(Box::new(buffer.clone())), buffer)
    }

    async fn next_intent(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> OutgoingIntent {
        match rx.recv().await {
            Some(SessionEvent::Input(intent)) => intent,
            other => panic!("expected input event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lines_arrive_in_order_then_eof_terminates() {
        let (gate, buffer) = gate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = Cursor::new("hello\n  world  \n\n");
        let mut reader = InputReader::spawn(
            move || Ok(BufReadSource::new(input)),
            tx,
            gate,
            "> ".to_string(),
        )
        .await
        .unwrap();

        assert_eq!(
            next_intent(&mut rx).await,
            OutgoingIntent::SendText("hello".to_string())
        );
        assert_eq!(
            next_intent(&mut rx).await,
            OutgoingIntent::SendText("world".to_string())
        );
        assert_eq!(
            next_intent(&mut rx).await,
            OutgoingIntent::SendText(String::new())
        );
        assert_eq!(next_intent(&mut rx).await, OutgoingIntent::Terminate);
        reader.shutdown().await;
        assert!(reader.has_finished());
        assert!(buffer.contents().starts_with("> "));
    }

    #[tokio::test]
    async fn exit_command_ends_thread() {
        let (gate, _buffer) = gate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (lines, source) = ChannelSource::new();
        let mut reader =
            InputReader::spawn(move || Ok(source), tx, gate, "> ".to_string())
                .await
                .unwrap();

        lines.send("/quit".to_string()).unwrap();
        assert_eq!(next_intent(&mut rx).await, OutgoingIntent::Terminate);
        reader.shutdown().await;
        assert!(reader.has_finished());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_discards_line_after_stop() {
        let (gate, _buffer) = gate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (lines, source) = ChannelSource::new();
        let mut reader =
            InputReader::spawn(move || Ok(source), tx, gate, "> ".to_string())
                .await
                .unwrap();
        assert!(!reader.has_finished());

        let stopping = tokio::spawn(async move {
            reader.shutdown().await;
            reader
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        lines.send("after stop".to_string()).unwrap();
        let reader = stopping.await.unwrap();
        assert!(reader.has_finished());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let (gate, _buffer) = gate();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = InputReader::spawn(
            || -> Result<ChannelSource> { Err(Error::input("no terminal", None)) },
            tx,
            gate,
            "> ".to_string(),
        )
        .await;
        match result {
            Err(err) => assert!(err.is_input()),
            Ok(_) => panic!("expected input error"),
        }
    }
}
