//! Diagnostic logging for the ChatStack client.
//!
//! The terminal belongs to the chat, so diagnostics only ever go to a log
//! file.  The filter comes from the `CHATSTACK_LOG` environment variable and
//! defaults to `info`.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::error::{Error, Result};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "CHATSTACK_LOG";

const DEFAULT_DIRECTIVES: &str = "info";

/// Builds the filter from `CHATSTACK_LOG`, falling back to `info`.
fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install a subscriber that appends diagnostics to `path`.
///
/// The parent directory is created when missing.  Fails if a global
/// subscriber is already installed.
pub fn init(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)
            .map_err(|err| Error::io("failed to create log directory", err))?;
    }

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| Error::io("failed to open log file", err))?;
    let log_file: Arc<File> = Arc::new(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true),
        )
        .with(filter())
        .try_init()
        .map_err(|err| Error::config(format!("failed to install log subscriber: {err}")))
}
