//! Core chat session management.
//!
//! [`SessionController`] owns the [`Session`] and drains one ordered event
//! channel.  The input thread and the connection's event pump only enqueue
//! events; every state change happens here, one event at a time.  Inbound
//! messages resolve their sender names concurrently but print in arrival
//! order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesOrdered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{
    Connection, ConnectionEvent, Connector, Directory, EventStream, IncomingMessage, RoomRef,
};
use crate::chat::commands::OutgoingIntent;
use crate::chat::config::ChatConfig;
use crate::chat::console::OutputGate;
use crate::chat::input::{InputReader, LineSource};
use crate::chat::names::DisplayNameCache;
use crate::chat::render::MessagePrinter;
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_MESSAGES_PRINTED, SESSION_MESSAGES_RECEIVED, SESSION_MESSAGES_SENT,
    SESSION_RECONNECT_ATTEMPTS, SESSION_RECONNECT_FAILURES, SESSION_SEND_ERRORS,
};

/// Banner printed once the room is joined.
pub const WELCOME_MESSAGE: &str = "You are now in the chat. Type /exit or /quit to exit.";

/// Printed when the session ends while the input thread still waits on a line.
pub const PRESS_ENTER_MESSAGE: &str = "Press Enter to exit.";

/// Lifecycle of a chat session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet joined.
    Idle,
    /// Joining the room, initially or after a lost connection.
    Joining,
    /// In the room; input and inbound messages flow.
    Joined,
    /// Shutting down.
    Closing,
    /// Finished.  Terminal.
    Closed,
}

impl SessionState {
    /// Returns true when moving from `self` to `next` is allowed.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Joining)
                | (Joining, Joined)
                | (Joining, Closing)
                | (Joining, Closed)
                | (Joined, Joining)
                | (Joined, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Joining => "joining",
            SessionState::Joined => "joined",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State owned by the controller for one chat session.
pub struct Session {
    state: SessionState,
    room: Option<RoomRef>,
    members: u64,
    connection: Option<Box<dyn Connection>>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            room: None,
            members: 0,
            connection: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The joined room, once a join was attempted.
    pub fn room(&self) -> Option<&RoomRef> {
        self.room.as_ref()
    }

    /// Members online at the last successful join.
    pub fn member_count(&self) -> u64 {
        self.members
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(Error::validation(
                format!("invalid session transition from {} to {next}", self.state),
                Some("state".to_string()),
            ));
        }
        tracing::debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
        Ok(())
    }
}

/// Everything the controller reacts to, in the order it was enqueued.
#[derive(Debug)]
pub enum SessionEvent {
    /// A parsed input line.
    Input(OutgoingIntent),
    /// A message pushed by the connection of the given epoch.
    Inbound {
        /// Connection generation that delivered the message.
        epoch: u64,
        /// The message.
        message: IncomingMessage,
    },
    /// The connection of the given epoch went away.
    Disconnected {
        /// Connection generation that was lost.
        epoch: u64,
        /// Why it went away.
        reason: String,
    },
    /// Orderly shutdown requested through a [`StopHandle`].
    Stop,
}

/// Requests an orderly shutdown from any thread.
#[derive(Clone, Debug)]
pub struct StopHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl StopHandle {
    /// Asks the session to stop.  Has no effect once it has finished.
    pub fn stop(&self) {
        let _ = self.events.send(SessionEvent::Stop);
    }
}

enum Outcome {
    Terminated,
    Stopped,
    Failed(Error),
}

type PendingPrint = BoxFuture<'static, (String, IncomingMessage)>;

/// Drives one chat session from join to close.
pub struct SessionController {
    config: ChatConfig,
    connector: Arc<dyn Connector>,
    names: Arc<DisplayNameCache>,
    gate: OutputGate,
    printer: MessagePrinter,
    session: Session,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    held: VecDeque<SessionEvent>,
    epoch: u64,
    pump: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Creates an idle controller.
    ///
    /// `connector` is used for reconnects; `directory` backs the name cache.
    pub fn new(
        config: ChatConfig,
        connector: Arc<dyn Connector>,
        directory: Arc<dyn Directory>,
        gate: OutputGate,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let names = Arc::new(DisplayNameCache::new(directory, config.lookup_timeout));
        let printer = MessagePrinter::new(gate.clone(), &config);
        Self {
            config,
            connector,
            names,
            gate,
            printer,
            session: Session::new(),
            events_tx,
            events_rx,
            held: VecDeque::new(),
            epoch: 0,
            pump: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The room this session joined.
    pub fn room(&self) -> Option<&RoomRef> {
        self.session.room()
    }

    /// Members online at the last successful join.
    pub fn member_count(&self) -> u64 {
        self.session.member_count()
    }

    /// The display name cache used for inbound messages.
    pub fn names(&self) -> &DisplayNameCache {
        &self.names
    }

    /// Returns a handle that stops the session from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Joins `room` over `connection` and starts receiving its events.
    ///
    /// On failure the connection is closed, the session is `Closed`, the
    /// error is printed, and a join error is returned.
    pub async fn start(&mut self, connection: Box<dyn Connection>, room: RoomRef) -> Result<()> {
        self.session.transition(SessionState::Joining)?;
        self.session.room = Some(room.clone());
        tracing::info!(room = %room, "joining chatroom");

        let members = match self.attach(connection, &room).await {
            Ok(members) => members,
            Err(err) => {
                let err = err.into_join(&room.name);
                tracing::warn!(error = %err, "join failed");
                self.session.transition(SessionState::Closed)?;
                self.printer.error(&err.to_string());
                return Err(err);
            }
        };

        self.session.transition(SessionState::Joined)?;
        self.printer.info(WELCOME_MESSAGE);
        self.printer.info(&format!("{members} people online."));
        Ok(())
    }

    /// Reads input from a source opened by `open_input` and runs the session
    /// until it terminates.
    ///
    /// Returns `Ok` after an exit command, end of input, or a stop request;
    /// returns the fatal error when reconnecting failed.  Either way the
    /// session is `Closed` and both actors have finished.
    pub async fn run<F, S>(&mut self, open_input: F) -> Result<()>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
        S: LineSource + 'static,
    {
        if self.session.state() != SessionState::Joined {
            return Err(Error::validation(
                format!("cannot run a session that is {}", self.session.state()),
                Some("state".to_string()),
            ));
        }

        let input = match InputReader::spawn(
            open_input,
            self.events_tx.clone(),
            self.gate.clone(),
            self.config.prompt.clone(),
        )
        .await
        {
            Ok(input) => input,
            Err(err) => {
                tracing::warn!(error = %err, "failed to start input");
                self.printer.error(&err.to_string());
                self.session.transition(SessionState::Closing)?;
                self.detach().await;
                self.session.transition(SessionState::Closed)?;
                return Err(err);
            }
        };

        self.printer.set_reprompt(true);
        let mut pending = FuturesOrdered::new();
        let outcome = self.dispatch(&mut pending).await;
        self.shutdown(input, pending, outcome).await
    }

    async fn dispatch(&mut self, pending: &mut FuturesOrdered<PendingPrint>) -> Outcome {
        loop {
            if let Some(event) = self.held.pop_front() {
                if let Some(outcome) = self.handle(event, pending).await {
                    return outcome;
                }
                continue;
            }
            tokio::select! {
                Some((username, message)) = pending.next(), if !pending.is_empty() => {
                    self.print(&username, &message);
                }
                event = self.events_rx.recv() => {
                    let Some(event) = event else {
                        return Outcome::Stopped;
                    };
                    if let Some(outcome) = self.handle(event, pending).await {
                        return outcome;
                    }
                }
            }
        }
    }

    async fn handle(
        &mut self,
        event: SessionEvent,
        pending: &mut FuturesOrdered<PendingPrint>,
    ) -> Option<Outcome> {
        match event {
            SessionEvent::Input(OutgoingIntent::Terminate) => {
                tracing::info!("exit requested");
                return Some(Outcome::Terminated);
            }
            SessionEvent::Input(intent) => self.send(&intent).await,
            SessionEvent::Stop => {
                tracing::info!("stop requested");
                return Some(Outcome::Stopped);
            }
            SessionEvent::Inbound { epoch, message } => {
                if epoch != self.epoch {
                    tracing::debug!(epoch, "dropping message from replaced connection");
                    return None;
                }
                SESSION_MESSAGES_RECEIVED.click();
                pending.push_back(self.resolve(message));
            }
            SessionEvent::Disconnected { epoch, reason } => {
                if epoch != self.epoch {
                    return None;
                }
                match self.reconnect(&reason).await {
                    Ok(None) => {}
                    Ok(Some(outcome)) => return Some(outcome),
                    Err(err) => return Some(Outcome::Failed(err)),
                }
            }
        }
        None
    }

    fn resolve(&self, message: IncomingMessage) -> PendingPrint {
        let names = Arc::clone(&self.names);
        async move {
            let username = names.resolve(&message.sender_id).await;
            (username, message)
        }
        .boxed()
    }

    fn print(&self, username: &str, message: &IncomingMessage) {
        self.printer.print(username, &message.text);
        SESSION_MESSAGES_PRINTED.click();
    }

    async fn send(&mut self, intent: &OutgoingIntent) {
        let Some(text) = intent.sendable_text() else {
            return;
        };
        let Some(connection) = self.session.connection.as_mut() else {
            self.printer.warn("Not connected; message was not sent.");
            return;
        };
        match connection.send(text).await {
            Ok(id) => {
                SESSION_MESSAGES_SENT.click();
                tracing::debug!(message_id = %id, "message sent");
            }
            Err(err) => {
                SESSION_SEND_ERRORS.click();
                tracing::warn!(error = %err, "send failed");
                self.printer.warn(&err.to_string());
            }
        }
    }

    /// Joins over `connection` and starts its event pump under a new epoch.
    async fn attach(&mut self, mut connection: Box<dyn Connection>, room: &RoomRef) -> Result<u64> {
        let joined = match connection.join(room).await {
            Ok(joined) => joined,
            Err(err) => {
                connection.close().await;
                return Err(err);
            }
        };
        let members = match connection.members_count().await {
            Ok(members) => members,
            Err(err) => {
                tracing::debug!(error = %err, "members_count failed; using join count");
                joined
            }
        };
        let stream = match connection.subscribe() {
            Ok(stream) => stream,
            Err(err) => {
                connection.close().await;
                return Err(err);
            }
        };

        self.epoch += 1;
        self.pump = Some(spawn_pump(self.epoch, stream, self.events_tx.clone()));
        self.session.connection = Some(connection);
        self.session.members = members;
        tracing::info!(epoch = self.epoch, members, "joined chatroom");
        Ok(members)
    }

    /// Closes the current connection and waits for its pump to finish.
    async fn detach(&mut self) {
        if let Some(mut connection) = self.session.connection.take() {
            connection.close().await;
        }
        if let Some(pump) = self.pump.take()
            && let Err(err) = pump.await
        {
            tracing::warn!(error = %err, "event pump failed");
        }
    }

    /// Rejoins the room after the connection was lost.
    ///
    /// Returns `Ok(None)` once rejoined and `Ok(Some(_))` when a stop or exit
    /// request arrived first.  Other events that arrive meanwhile are held
    /// and handled after the rejoin.
    async fn reconnect(&mut self, reason: &str) -> Result<Option<Outcome>> {
        tracing::warn!(reason, "connection lost");
        self.printer
            .warn(&format!("Connection lost ({reason}). Reconnecting..."));
        self.detach().await;
        self.session.transition(SessionState::Joining)?;

        let room = self
            .session
            .room
            .clone()
            .ok_or_else(|| Error::validation("no room to rejoin", Some("room".to_string())))?;
        let policy = self.config.reconnect;
        let mut last_error = None;
        for attempt in 1..=policy.max_attempts {
            if let Some(outcome) = self.back_off(policy.backoff(attempt)).await {
                tracing::info!(attempt, "reconnect abandoned");
                return Ok(Some(outcome));
            }
            SESSION_RECONNECT_ATTEMPTS.click();
            let result = match self.connector.open().await {
                Ok(connection) => self.attach(connection, &room).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(members) => {
                    self.session.transition(SessionState::Joined)?;
                    tracing::info!(attempt, "reconnected");
                    self.printer
                        .info(&format!("Reconnected. {members} people online."));
                    return Ok(None);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "reconnect attempt failed");
                    last_error = Some(err);
                }
            }
        }

        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(outcome) = self.hold(event) {
                tracing::info!("reconnect abandoned");
                return Ok(Some(outcome));
            }
        }
        SESSION_RECONNECT_FAILURES.click();
        let detail = match last_error {
            Some(err) => err.to_string(),
            None => "reconnecting is disabled".to_string(),
        };
        Err(Error::connection(
            format!(
                "lost connection and could not reconnect after {} attempts: {detail}",
                policy.max_attempts
            ),
            None,
        ))
    }

    /// Waits out `delay` unless a stop or exit request arrives first.
    async fn back_off(&mut self, delay: Duration) -> Option<Outcome> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return None,
                event = self.events_rx.recv() => {
                    let Some(event) = event else {
                        return Some(Outcome::Stopped);
                    };
                    if let Some(outcome) = self.hold(event) {
                        return Some(outcome);
                    }
                }
            }
        }
    }

    /// Keeps `event` for after the rejoin, unless it ends the session.
    fn hold(&mut self, event: SessionEvent) -> Option<Outcome> {
        match event {
            SessionEvent::Stop => Some(Outcome::Stopped),
            SessionEvent::Input(OutgoingIntent::Terminate) => Some(Outcome::Terminated),
            event => {
                self.held.push_back(event);
                None
            }
        }
    }

    async fn shutdown(
        &mut self,
        mut input: InputReader,
        mut pending: FuturesOrdered<PendingPrint>,
        outcome: Outcome,
    ) -> Result<()> {
        self.session.transition(SessionState::Closing)?;
        self.printer.set_reprompt(false);
        while let Some((username, message)) = pending.next().await {
            self.print(&username, &message);
        }
        self.detach().await;

        let (result, input_ended) = match outcome {
            Outcome::Terminated => (Ok(()), true),
            Outcome::Stopped => (Ok(()), false),
            Outcome::Failed(err) => {
                tracing::error!(error = %err, "session failed");
                self.printer.error(&err.to_string());
                (Err(err), false)
            }
        };
        if !input_ended && !input.has_finished() {
            self.printer.info(PRESS_ENTER_MESSAGE);
        }
        input.shutdown().await;

        self.session.transition(SessionState::Closed)?;
        tracing::info!("session closed");
        result
    }
}

/// Forwards one connection's events into the controller channel.
fn spawn_pump(
    epoch: u64,
    mut stream: EventStream,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            let event = match event {
                ConnectionEvent::Message(message) => SessionEvent::Inbound { epoch, message },
                ConnectionEvent::Disconnected { reason } => {
                    let _ = events.send(SessionEvent::Disconnected { epoch, reason });
                    return;
                }
            };
            if events.send(event).is_err() {
                return;
            }
        }
        let _ = events.send(SessionEvent::Disconnected {
            epoch,
            reason: "event stream closed".to_string(),
        });
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::backend::MessageId;
    use crate::chat::console::BufferConsole;
    use crate::chat::input::ChannelSource;

    #[derive(Default)]
    struct Script {
        sent: Mutex<Vec<String>>,
        fail_sends: bool,
        reject_join: bool,
        closed: Mutex<u32>,
    }

    struct ScriptedConnection {
        script: Arc<Script>,
        events: Option<EventStream>,
        feed: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    }

    impl ScriptedConnection {
        fn new(script: &Arc<Script>) -> Box<dyn Connection> {
            let (tx, rx) = mpsc::unbounded_channel();
            Box::new(Self {
                script: Arc::clone(script),
                events: Some(rx),
                feed: Some(tx),
            })
        }
    }

    #[async_trait::async_trait]
    impl Connection for ScriptedConnection {
        async fn join(&mut self, room: &RoomRef) -> Result<u64> {
            if self.script.reject_join {
                return Err(Error::join("rejected", Some(room.name.clone())));
            }
            Ok(2)
        }

        async fn send(&mut self, text: &str) -> Result<MessageId> {
            if self.script.fail_sends {
                return Err(Error::send("backend refused the message", None));
            }
            let mut sent = self.script.sent.lock().unwrap();
            sent.push(text.to_string());
            Ok(MessageId(format!("m{}", sent.len())))
        }

        async fn members_count(&self) -> Result<u64> {
            Err(Error::validation("members_count is not supported", None))
        }

        fn subscribe(&mut self) -> Result<EventStream> {
            self.events
                .take()
                .ok_or_else(|| Error::validation("already subscribed", None))
        }

        async fn close(&mut self) {
            *self.script.closed.lock().unwrap() += 1;
            self.feed = None;
        }
    }

    struct NoConnector;

    #[async_trait::async_trait]
    impl Connector for NoConnector {
        async fn open(&self) -> Result<Box<dyn Connection>> {
            Err(Error::connection("offline", None))
        }
    }

    struct NoDirectory;

    #[async_trait::async_trait]
    impl Directory for NoDirectory {
        async fn username(&self, sender_id: &str) -> Result<String> {
            Err(Error::lookup("no directory", sender_id))
        }
    }

    fn controller() -> (SessionController, BufferConsole) {
        let buffer = BufferConsole::new();
        let config = ChatConfig::new()
            .without_color()
            .with_alert(crate::chat::config::Alert::Disabled)
            .with_lookup_timeout(Duration::from_millis(100));
        let controller = SessionController::new(
            config,
            Arc::new(NoConnector),
            Arc::new(NoDirectory),
            OutputGate::new(Box::new(buffer.clone())),
        );
        (controller, buffer)
    }

    fn room() -> RoomRef {
        RoomRef::new("room-1", "ChatStack")
    }

    #[test]
    fn transitions() {
        use SessionState::*;
        assert!(Idle.can_transition(Joining));
        assert!(Joined.can_transition(Joining));
        assert!(Joining.can_transition(Closed));
        assert!(!Idle.can_transition(Joined));
        assert!(!Closed.can_transition(Joining));
        assert!(!Closing.can_transition(Joined));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut session = Session::new();
        let err = session.transition(SessionState::Closed).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn start_prints_banner_with_join_count() {
        let script = Arc::new(Script::default());
        let (mut controller, buffer) = controller();
        controller
            .start(ScriptedConnection::new(&script), room())
            .await
            .unwrap();

        assert_eq!(controller.state(), SessionState::Joined);
        assert_eq!(controller.member_count(), 2);
        assert_eq!(controller.room(), Some(&room()));
        let out = buffer.contents();
        assert!(out.contains(WELCOME_MESSAGE));
        assert!(out.contains("2 people online."));
    }

    #[tokio::test]
    async fn rejected_join_closes_session() {
        let script = Arc::new(Script {
            reject_join: true,
            ..Script::default()
        });
        let (mut controller, buffer) = controller();
        let err = controller
            .start(ScriptedConnection::new(&script), room())
            .await
            .unwrap_err();

        assert!(err.is_join());
        assert!(err.is_fatal());
        assert_eq!(controller.state(), SessionState::Closed);
        assert_eq!(*script.closed.lock().unwrap(), 1);
        assert!(buffer.contents().contains("Could not join ChatStack"));
    }

    #[tokio::test]
    async fn run_requires_joined_session() {
        let (mut controller, _buffer) = controller();
        let (_lines, source) = ChannelSource::new();
        let err = controller.run(move || Ok(source)).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn send_failure_warns_and_continues() {
        let script = Arc::new(Script {
            fail_sends: true,
            ..Script::default()
        });
        let (mut controller, buffer) = controller();
        controller
            .start(ScriptedConnection::new(&script), room())
            .await
            .unwrap();

        let (lines, source) = ChannelSource::new();
        lines.send("first".to_string()).unwrap();
        lines.send("second".to_string()).unwrap();
        lines.send("/exit".to_string()).unwrap();
        controller.run(move || Ok(source)).await.unwrap();

        assert_eq!(controller.state(), SessionState::Closed);
        let out = buffer.contents();
        assert_eq!(out.matches("Warning: Send error").count(), 2);
        assert!(!out.contains(PRESS_ENTER_MESSAGE));
    }

    #[tokio::test]
    async fn stop_handle_ends_run() {
        let script = Arc::new(Script::default());
        let (mut controller, buffer) = controller();
        controller
            .start(ScriptedConnection::new(&script), room())
            .await
            .unwrap();

        let (lines, source) = ChannelSource::new();
        let stop = controller.stop_handle();
        let running = tokio::spawn(async move {
            let result = controller.run(move || Ok(source)).await;
            (controller, result)
        });
        stop.stop();
        // The input thread is still waiting for a line.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(lines);

        let (controller, result) = running.await.unwrap();
        result.unwrap();
        assert_eq!(controller.state(), SessionState::Closed);
        assert!(buffer.contents().contains(PRESS_ENTER_MESSAGE));
        assert!(script.sent.lock().unwrap().is_empty());
    }
}
