//! Terminal client for the ChatStack chatroom.
//!
//! Without a command, chats in an in-process chatroom with an echo peer.
//! The account commands talk to the hosted backend's REST API and read the
//! application credentials from `--credentials <yaml>` or the
//! `CHATSTACK_APP_ID`, `CHATSTACK_APP_KEY` and `CHATSTACK_SERVER_URL`
//! environment variables.
//!
//! # Usage
//!
//! ```bash
//! chatstack [--mute] [--username NAME]
//! chatstack login <username|email> <password>
//! chatstack logout
//! chatstack signup <username> <password> <password-confirm> [--email EMAIL]
//! chatstack bind <username|email> <password> --email EMAIL
//! chatstack chpwd <username|email> <password> <new-password> <new-password-confirm>
//! chatstack resetpwd --email EMAIL
//! ```
//!
//! While chatting, `/exit` or `/quit` leaves the chatroom.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use arrrg::CommandLine;

use chatstack::chat::{
    AppCredentials, BufReadSource, ChatConfig, ChatstackArgs, OutputGate, RustylineSource,
    SessionController,
};
use chatstack::{Connector, DEFAULT_ROOM_NAME, Error, LeanCloud, LocalHub, Result, logging};

const USAGE: &str = "USAGE: chatstack [OPTIONS] [login|logout|signup|bind|chpwd|resetpwd ARGS...]";

const LOCAL_CLIENT_ID: &str = "local-user";
const ECHO_CLIENT_ID: &str = "echo-peer";
const ECHO_USERNAME: &str = "Echo";
const DEFAULT_USERNAME: &str = "you";

/// Main entry point for the chatstack application.
#[tokio::main]
async fn main() -> ExitCode {
    let (args, free) = ChatstackArgs::from_command_line_relaxed(USAGE);
    if let Some(path) = &args.log_file
        && let Err(err) = logging::init(Path::new(path))
    {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let free: Vec<&str> = free.iter().map(String::as_str).collect();
    let result = match free.as_slice() {
        [] => match chat(&args).await {
            Ok(true) => return ExitCode::SUCCESS,
            // The session already reported why it ended.
            Ok(false) => return ExitCode::FAILURE,
            Err(err) => Err(err),
        },
        ["logout"] => {
            println!("Logged out.");
            Ok(())
        }
        ["login", identity, password] => login(&args, identity, password).await,
        ["signup", username, password, confirm] => {
            signup(&args, username, password, confirm).await
        }
        ["bind", identity, password] => bind(&args, identity, password).await,
        ["chpwd", identity, password, new, confirm] => {
            change_password(&args, identity, password, new, confirm).await
        }
        ["resetpwd"] => reset_password(&args).await,
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Runs a chat session against the in-process chatroom.
///
/// Returns whether the session ended cleanly; errors are only returned for
/// failures before the session starts.
async fn chat(args: &ChatstackArgs) -> Result<bool> {
    let config = ChatConfig::from(args);
    let hub = LocalHub::new(config.room_name.clone());
    let username = args.username.as_deref().unwrap_or(DEFAULT_USERNAME);
    hub.register_user(LOCAL_CLIENT_ID, username);
    let _echo = hub.spawn_echo_peer(ECHO_CLIENT_ID, ECHO_USERNAME).await?;

    let connector = hub.connector(LOCAL_CLIENT_ID);
    let connection = connector.open().await?;
    let room = hub.room();
    let mut controller = SessionController::new(
        config,
        Arc::new(connector),
        Arc::new(hub),
        OutputGate::stdout(),
    );

    let stop = controller.stop_handle();
    ctrlc::set_handler(move || stop.stop())
        .map_err(|err| Error::config(format!("failed to install signal handler: {err}")))?;

    if controller.start(connection, room).await.is_err() {
        return Ok(false);
    }
    let outcome = if io::stdin().is_terminal() {
        controller.run(RustylineSource::new).await
    } else {
        controller
            .run(|| Ok(BufReadSource::new(io::stdin().lock())))
            .await
    };
    Ok(outcome.is_ok())
}

fn client(args: &ChatstackArgs) -> Result<LeanCloud> {
    let credentials = AppCredentials::load(args.credentials.as_deref().map(Path::new))?;
    LeanCloud::new(credentials)
}

fn required_email(args: &ChatstackArgs) -> Result<&str> {
    args.email
        .as_deref()
        .ok_or_else(|| Error::validation("--email is required", Some("email".to_string())))
}

async fn login(args: &ChatstackArgs, identity: &str, password: &str) -> Result<()> {
    let client = client(args)?;
    let user = client.log_in(identity, password).await?;
    let room = client.find_chatroom(DEFAULT_ROOM_NAME).await?;
    println!("Logged in as {}.", user.username);
    println!("Chatroom: {room}");
    Ok(())
}

async fn signup(args: &ChatstackArgs, username: &str, password: &str, confirm: &str) -> Result<()> {
    if password != confirm {
        println!("Passwords do not match.");
        return Ok(());
    }
    let client = client(args)?;
    client
        .sign_up(username, password, args.email.as_deref())
        .await?;
    println!("User created.");
    if args.email.is_some() {
        println!("Verification email sent. Please check your inbox.");
    }
    Ok(())
}

async fn bind(args: &ChatstackArgs, identity: &str, password: &str) -> Result<()> {
    let email = required_email(args)?;
    let client = client(args)?;
    let user = client.log_in(identity, password).await?;
    client.set_email(&user, email).await?;
    println!("Verification email sent. Please check your inbox.");
    Ok(())
}

async fn change_password(
    args: &ChatstackArgs,
    identity: &str,
    password: &str,
    new: &str,
    confirm: &str,
) -> Result<()> {
    if new != confirm {
        println!("New passwords do not match.");
        return Ok(());
    }
    let client = client(args)?;
    let user = client.log_in(identity, password).await?;
    client.change_password(&user, password, new).await?;
    println!("Password changed.");
    Ok(())
}

async fn reset_password(args: &ChatstackArgs) -> Result<()> {
    let email = required_email(args)?;
    let client = client(args)?;
    client.request_password_reset(email).await?;
    println!("Password reset email sent. Please check your inbox.");
    Ok(())
}
