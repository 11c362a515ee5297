//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging with optional file output.
//! Integrates with the tracing ecosystem for structured event logging.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Run `f` with a warn-level subscriber writing to `writer`.
///
/// Covers the window before [`init_logging`] runs, when the logging
/// configuration itself is still being loaded, so configuration warnings
/// are not lost.
///
/// # Examples
///
/// ```
/// use cdcwatch::config::{Config, Overrides};
/// use cdcwatch::watcher::logging::with_startup_logging;
///
/// let config = with_startup_logging(std::io::stderr, || {
///     Config::load("missing.yaml", &Overrides::default())
/// });
/// assert!(config.is_ok());
/// ```
pub fn with_startup_logging<W, T>(writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_writer(writer)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level. When a file path
/// is set, every event is appended to the file in addition to STDOUT.
///
/// # Errors
///
/// Returns an error if the level is not a valid filter, the log file cannot
/// be opened, or a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use cdcwatch::config::LoggingConfig;
/// use cdcwatch::watcher::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     json_format: true,
///     file_path: None,
///     include_payload: false,
/// };
///
/// let result = init_logging(&config);
/// assert!(result.is_ok());
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_format {
        let stdout_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true);

        if let Some(file_path) = &config.file_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(Arc::new(file));

            registry.with(stdout_layer).with(file_layer).try_init()?;
        } else {
            registry.with(stdout_layer).try_init()?;
        }
    } else {
        let stdout_layer = fmt::layer().with_target(true).with_level(true);

        if let Some(file_path) = &config.file_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));

            registry.with(stdout_layer).with(file_layer).try_init()?;
        } else {
            registry.with(stdout_layer).try_init()?;
        }
    }

    Ok(())
}

/// Create a span carrying the position of a [`RawMessage`](crate::cdc::RawMessage).
///
/// # Examples
///
/// ```
/// use cdcwatch::cdc::RawMessage;
///
/// let message = RawMessage::new("users", 0, 42, Vec::new());
/// let span = cdcwatch::message_fields!(message);
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! message_fields {
    ($message:expr) => {
        tracing::info_span!(
            "message",
            topic = %$message.topic,
            partition = $message.partition,
            offset = $message.offset
        )
    };
}
