//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg`, the resolved
//! session configuration, and the application credentials used by the REST
//! client.

use std::path::Path;
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::Deserialize;

use crate::backend::DEFAULT_ROOM_NAME;
use crate::error::{Error, Result};

/// Default deadline for one directory lookup.
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of reconnect attempts after the connection drops.
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Delay before the first reconnect attempt.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on the delay between reconnect attempts.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Prompt shown while waiting for input.
pub const DEFAULT_PROMPT: &str = "> ";

/// Environment variable holding the application id.
pub const APP_ID_ENV: &str = "CHATSTACK_APP_ID";

/// Environment variable holding the application key.
pub const APP_KEY_ENV: &str = "CHATSTACK_APP_KEY";

/// Environment variable holding the REST server URL.
pub const SERVER_URL_ENV: &str = "CHATSTACK_SERVER_URL";

/// Command-line arguments for the chatstack tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatstackArgs {
    /// Stop playing the beep sound when a message arrives.
    #[arrrg(flag, "Stop playing the beep sound when you receive a message")]
    pub mute: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Display name in the in-process chatroom.
    #[arrrg(optional, "Display name in the local chatroom (default: you)", "NAME")]
    pub username: Option<String>,

    /// E-mail address for signup, bind, and password reset.
    #[arrrg(optional, "E-mail address for signup, bind, and resetpwd", "EMAIL")]
    pub email: Option<String>,

    /// YAML file holding the application credentials.
    #[arrrg(optional, "YAML file with app_id, app_key, server_url", "FILE")]
    pub credentials: Option<String>,

    /// Directory lookup deadline in milliseconds.
    #[arrrg(optional, "Name lookup timeout in milliseconds (default: 5000)", "MILLIS")]
    pub lookup_timeout_ms: Option<u64>,

    /// Reconnect attempts after the connection drops.
    #[arrrg(optional, "Reconnect attempts after connection loss (default: 3)", "COUNT")]
    pub reconnect_attempts: Option<u32>,

    /// File receiving diagnostic logs.
    #[arrrg(optional, "Write diagnostics to this file", "FILE")]
    pub log_file: Option<String>,
}

/// Whether an audible alert precedes each printed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    /// Ring the terminal bell before printing.
    Enabled,
    /// Print silently.
    Disabled,
}

impl Alert {
    /// Maps the `--mute` flag onto an alert setting.
    pub fn from_mute(mute: bool) -> Self {
        if mute { Alert::Disabled } else { Alert::Enabled }
    }

    /// Returns true when the bell should ring.
    pub fn is_enabled(self) -> bool {
        matches!(self, Alert::Enabled)
    }
}

/// Bounded exponential backoff for reconnecting a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before the session gives up.  Zero disables reconnecting.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_backoff: Duration,
    /// Cap on any single delay.
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Creates a policy.
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Returns the delay before `attempt` (1-based); doubles per attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_ATTEMPTS,
            DEFAULT_INITIAL_BACKOFF,
            DEFAULT_MAX_BACKOFF,
        )
    }
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Audible alert on incoming messages.
    pub alert: Alert,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Prompt shown while waiting for input.
    pub prompt: String,

    /// Name of the chatroom to join.
    pub room_name: String,

    /// Deadline for one directory lookup.
    pub lookup_timeout: Duration,

    /// How dropped connections are retried.
    pub reconnect: ReconnectPolicy,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Alert: enabled
    /// - Color: enabled
    /// - Prompt: `> `
    /// - Room: ChatStack
    /// - Lookup timeout: 5 seconds
    /// - Reconnect: 3 attempts, 500ms doubling up to 8s
    pub fn new() -> Self {
        Self {
            alert: Alert::Enabled,
            use_color: true,
            prompt: DEFAULT_PROMPT.to_string(),
            room_name: DEFAULT_ROOM_NAME.to_string(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Sets the alert behavior.
    pub fn with_alert(mut self, alert: Alert) -> Self {
        self.alert = alert;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Sets the chatroom name.
    pub fn with_room_name(mut self, room_name: impl Into<String>) -> Self {
        self.room_name = room_name.into();
        self
    }

    /// Sets the directory lookup deadline.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&ChatstackArgs> for ChatConfig {
    fn from(args: &ChatstackArgs) -> Self {
        let mut config = ChatConfig::new().with_alert(Alert::from_mute(args.mute));
        if args.no_color {
            config = config.without_color();
        }
        if let Some(millis) = args.lookup_timeout_ms {
            config = config.with_lookup_timeout(Duration::from_millis(millis));
        }
        if let Some(attempts) = args.reconnect_attempts {
            config.reconnect.max_attempts = attempts;
        }
        config
    }
}

impl From<ChatstackArgs> for ChatConfig {
    fn from(args: ChatstackArgs) -> Self {
        ChatConfig::from(&args)
    }
}

/// Application credentials for the hosted backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AppCredentials {
    /// Application id.
    pub app_id: String,
    /// Application key.
    pub app_key: String,
    /// Base URL of the REST API, e.g. `https://abcdefgh.api.lncldglobal.com`.
    pub server_url: String,
}

impl AppCredentials {
    /// Reads credentials from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::io(
                format!("failed to read credentials from {}", path.display()),
                err,
            )
        })?;
        let credentials: Self = serde_yaml::from_str(&content)?;
        credentials.validate()
    }

    /// Reads credentials from the `CHATSTACK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds credentials from a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| Error::config(format!("{name} is not set")))
        };
        Self {
            app_id: required(APP_ID_ENV)?,
            app_key: required(APP_KEY_ENV)?,
            server_url: required(SERVER_URL_ENV)?,
        }
        .validate()
    }

    /// Uses the file when given, the environment otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    fn validate(self) -> Result<Self> {
        for (name, value) in [
            ("app_id", &self.app_id),
            ("app_key", &self.app_key),
            ("server_url", &self.server_url),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(
                    "credential value is empty",
                    Some(name.to_string()),
                ));
            }
        }
        Ok(self)
    }
}
