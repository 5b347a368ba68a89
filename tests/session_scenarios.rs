//! End-to-end chat sessions against the in-process hub.

use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use chatstack::chat::{
    Alert, BufferConsole, ChannelSource, ChatConfig, OutputGate, PRESS_ENTER_MESSAGE,
    ReconnectPolicy, SessionController, SessionState, WELCOME_MESSAGE,
};
use chatstack::{Connector, LocalHub, Result, TranscriptEntry};

const ME: &str = "me";

fn config() -> ChatConfig {
    ChatConfig::new()
        .without_color()
        .with_alert(Alert::Disabled)
        .with_lookup_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectPolicy::new(
            3,
            Duration::from_millis(10),
            Duration::from_millis(40),
        ))
}

fn hub() -> LocalHub {
    let hub = LocalHub::new("ChatStack");
    hub.register_user(ME, "me");
    hub
}

async fn joined(hub: &LocalHub) -> (SessionController, BufferConsole) {
    joined_with(hub, config()).await
}

async fn joined_with(hub: &LocalHub, config: ChatConfig) -> (SessionController, BufferConsole) {
    let buffer = BufferConsole::new();
    let connector = hub.connector(ME);
    let connection = connector.open().await.unwrap();
    let mut controller = SessionController::new(
        config,
        Arc::new(connector),
        Arc::new(hub.clone()),
        OutputGate::new(Box::new(buffer.clone())),
    );
    controller.start(connection, hub.room()).await.unwrap();
    (controller, buffer)
}

type Running = JoinHandle<(SessionController, Result<()>)>;

fn run(mut controller: SessionController) -> (Sender<String>, Running) {
    let (lines, source) = ChannelSource::new();
    let running = tokio::spawn(async move {
        let result = controller.run(move || Ok(source)).await;
        (controller, result)
    });
    (lines, running)
}

async fn wait_for(buffer: &BufferConsole, needle: &str) {
    for _ in 0..300 {
        if buffer.contents().contains(needle) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("never saw {needle:?} in output:\n{}", buffer.contents());
}

fn position(output: &str, needle: &str) -> usize {
    output
        .find(needle)
        .unwrap_or_else(|| panic!("missing {needle:?} in output:\n{output}"))
}

async fn finish(lines: Sender<String>, running: Running) -> (SessionController, Result<()>) {
    lines.send("/exit".to_string()).unwrap();
    running.await.unwrap()
}

#[tokio::test]
async fn typed_line_is_sent_once() {
    let hub = hub();
    let (controller, buffer) = joined(&hub).await;
    assert!(buffer.contents().contains(WELCOME_MESSAGE));
    assert!(buffer.contents().contains("1 people online."));

    let (lines, running) = run(controller);
    lines.send("hello".to_string()).unwrap();
    let (controller, result) = finish(lines, running).await;

    result.unwrap();
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(
        hub.transcript(),
        vec![TranscriptEntry {
            sender_id: ME.to_string(),
            text: "hello".to_string(),
            sequence: 1,
        }]
    );
    assert_eq!(hub.member_count(), 0);
}

#[tokio::test]
async fn back_to_back_messages_share_one_lookup() {
    let hub = hub();
    hub.register_user("u1", "alice");
    hub.set_lookup_delay(Duration::from_millis(50));
    let (controller, buffer) = joined(&hub).await;
    let (lines, running) = run(controller);

    hub.publish("u1", "first");
    hub.publish("u1", "second");
    wait_for(&buffer, "* alice: second").await;

    let output = buffer.contents();
    assert!(position(&output, "* alice: first") < position(&output, "* alice: second"));
    assert_eq!(hub.lookup_count("u1"), 1);

    let (controller, result) = finish(lines, running).await;
    result.unwrap();
    assert_eq!(controller.names().cached("u1").as_deref(), Some("alice"));
}

#[tokio::test]
async fn failed_lookup_prints_fallback_and_retries_later() {
    let hub = hub();
    let (controller, buffer) = joined(&hub).await;
    let (lines, running) = run(controller);

    hub.publish("u2", "who am i");
    wait_for(&buffer, "* unknown user (u2): who am i").await;
    assert_eq!(hub.lookup_count("u2"), 1);

    hub.register_user("u2", "bob");
    hub.publish("u2", "now you know");
    wait_for(&buffer, "* bob: now you know").await;
    assert_eq!(hub.lookup_count("u2"), 2);

    // The earlier line keeps its fallback name.
    assert!(buffer.contents().contains("* unknown user (u2): who am i"));
    finish(lines, running).await.1.unwrap();
}

#[tokio::test]
async fn exhausted_reconnects_close_the_session() {
    let hub = hub();
    let (controller, buffer) = joined(&hub).await;
    let (lines, running) = run(controller);

    hub.set_online(false);
    hub.drop_connections("server restart");
    wait_for(&buffer, PRESS_ENTER_MESSAGE).await;
    // The input thread is still waiting on a line; end it.
    drop(lines);

    let (controller, result) = running.await.unwrap();
    let err = result.unwrap_err();
    assert!(err.is_connection());
    assert!(err.is_fatal());
    assert_eq!(controller.state(), SessionState::Closed);

    let output = buffer.contents();
    assert!(output.contains("Connection lost (server restart)"));
    assert_eq!(output.matches("Error: Connection error").count(), 1);
    assert_eq!(hub.member_count(), 0);
}

#[tokio::test]
async fn dropped_connection_reconnects() {
    let hub = hub();
    hub.register_user("u1", "alice");
    let (controller, buffer) = joined(&hub).await;
    let (lines, running) = run(controller);

    hub.drop_connections("network blip");
    wait_for(&buffer, "Reconnected. 1 people online.").await;
    assert_eq!(hub.member_count(), 1);

    hub.publish("u1", "welcome back");
    wait_for(&buffer, "* alice: welcome back").await;
    lines.send("thanks".to_string()).unwrap();

    let (controller, result) = finish(lines, running).await;
    result.unwrap();
    assert_eq!(controller.state(), SessionState::Closed);
    let sent: Vec<_> = hub
        .transcript()
        .into_iter()
        .filter(|entry| entry.sender_id == ME)
        .map(|entry| entry.text)
        .collect();
    assert_eq!(sent, vec!["thanks"]);
}

fn slow_reconnects() -> ChatConfig {
    config().with_reconnect(ReconnectPolicy::new(
        3,
        Duration::from_millis(500),
        Duration::from_secs(2),
    ))
}

#[tokio::test]
async fn stop_during_reconnect_ends_cleanly() {
    let hub = hub();
    let (controller, buffer) = joined_with(&hub, slow_reconnects()).await;
    let stop = controller.stop_handle();
    let (lines, running) = run(controller);

    hub.set_online(false);
    hub.drop_connections("server restart");
    wait_for(&buffer, "Connection lost (server restart)").await;
    let stopped = Instant::now();
    stop.stop();
    wait_for(&buffer, PRESS_ENTER_MESSAGE).await;
    drop(lines);

    let (controller, result) = running.await.unwrap();
    result.unwrap();
    // The full backoff schedule is 3.5s; stopping must not wait it out.
    assert!(stopped.elapsed() < Duration::from_secs(1));
    assert_eq!(controller.state(), SessionState::Closed);
    assert!(!buffer.contents().contains("Error:"));
    assert_eq!(hub.member_count(), 0);
}

#[tokio::test]
async fn exit_during_reconnect_ends_cleanly() {
    let hub = hub();
    let (controller, buffer) = joined_with(&hub, slow_reconnects()).await;
    let (lines, running) = run(controller);

    hub.set_online(false);
    hub.drop_connections("server restart");
    wait_for(&buffer, "Connection lost (server restart)").await;
    lines.send("/quit".to_string()).unwrap();

    let (controller, result) = running.await.unwrap();
    result.unwrap();
    assert_eq!(controller.state(), SessionState::Closed);
    let output = buffer.contents();
    assert!(!output.contains("Error:"));
    assert!(!output.contains(PRESS_ENTER_MESSAGE));
}

#[tokio::test]
async fn lines_typed_while_reconnecting_are_sent_after_rejoin() {
    let hub = hub();
    let config = config().with_reconnect(ReconnectPolicy::new(
        3,
        Duration::from_millis(200),
        Duration::from_millis(400),
    ));
    let (controller, buffer) = joined_with(&hub, config).await;
    let (lines, running) = run(controller);

    hub.drop_connections("network blip");
    wait_for(&buffer, "Connection lost (network blip)").await;
    lines.send("still there?".to_string()).unwrap();
    wait_for(&buffer, "Reconnected.").await;

    let (_, result) = finish(lines, running).await;
    result.unwrap();
    let sent: Vec<_> = hub.transcript().into_iter().map(|entry| entry.text).collect();
    assert_eq!(sent, vec!["still there?"]);
}

#[tokio::test]
async fn blank_input_is_neither_sent_nor_echoed() {
    let hub = hub();
    let (controller, buffer) = joined(&hub).await;
    let banner = buffer.blocks();
    let (lines, running) = run(controller);

    lines.send(String::new()).unwrap();
    lines.send("   \t ".to_string()).unwrap();
    let (_, result) = finish(lines, running).await;
    result.unwrap();

    assert!(hub.transcript().is_empty());
    let after: Vec<String> = buffer
        .blocks()
        .into_iter()
        .skip(banner.len())
        .filter(|block| block != "> ")
        .collect();
    assert!(after.is_empty(), "unexpected output: {after:?}");
}

#[tokio::test]
async fn exit_commands_do_not_send() {
    for command in ["/exit", "  /quit  "] {
        let hub = hub();
        let (controller, _buffer) = joined(&hub).await;
        let (lines, running) = run(controller);
        lines.send(command.to_string()).unwrap();
        let (controller, result) = running.await.unwrap();
        result.unwrap();
        assert_eq!(controller.state(), SessionState::Closed);
        assert!(hub.transcript().is_empty());
    }
}

#[tokio::test]
async fn other_slash_lines_are_sent_verbatim() {
    let hub = hub();
    let (controller, _buffer) = joined(&hub).await;
    let (lines, running) = run(controller);
    lines.send("/EXIT".to_string()).unwrap();
    lines.send("/help me".to_string()).unwrap();
    finish(lines, running).await.1.unwrap();

    let sent: Vec<_> = hub.transcript().into_iter().map(|entry| entry.text).collect();
    assert_eq!(sent, vec!["/EXIT", "/help me"]);
}

#[tokio::test]
async fn messages_print_in_arrival_order_as_whole_blocks() {
    let hub = hub();
    for (id, name) in [("a", "ann"), ("b", "ben"), ("c", "cat")] {
        hub.register_user(id, name);
    }
    hub.set_lookup_delay(Duration::from_millis(20));
    let (controller, buffer) = joined(&hub).await;
    let (lines, running) = run(controller);

    let senders = ["a", "b", "c", "ghost"];
    for i in 0..20 {
        hub.publish(senders[i % senders.len()], &format!("message {i}"));
    }
    wait_for(&buffer, "message 19\n").await;
    finish(lines, running).await.1.unwrap();

    let printed: Vec<String> = buffer
        .blocks()
        .into_iter()
        .filter(|block| block.starts_with("\n* "))
        .collect();
    assert_eq!(printed.len(), 20);
    for (i, block) in printed.iter().enumerate() {
        let name = match senders[i % senders.len()] {
            "a" => "ann",
            "b" => "ben",
            "c" => "cat",
            _ => "unknown user (ghost)",
        };
        assert_eq!(block, &format!("\n* {name}: message {i}\n> "));
    }
    assert_eq!(hub.lookup_count("a"), 1);
}

#[tokio::test]
async fn rejected_join_is_fatal() {
    let hub = hub();
    hub.reject_joins(Some("room is full".to_string()));
    let buffer = BufferConsole::new();
    let connector = hub.connector(ME);
    let connection = connector.open().await.unwrap();
    let mut controller = SessionController::new(
        config(),
        Arc::new(connector),
        Arc::new(hub.clone()),
        OutputGate::new(Box::new(buffer.clone())),
    );

    let err = controller.start(connection, hub.room()).await.unwrap_err();
    assert!(err.is_join());
    assert_eq!(controller.state(), SessionState::Closed);
    assert!(
        buffer
            .contents()
            .contains("Error: Could not join ChatStack: room is full")
    );
    assert_eq!(hub.member_count(), 0);
}
