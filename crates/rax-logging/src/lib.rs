//! Structured logging setup for applications embedding RaxLog tables
//!
//! The storage and table crates only emit `tracing` events and spans. This
//! crate installs a subscriber that renders them.
//!
//! Console output is JSON lines by default, or pretty text. File output is
//! always JSON lines, rotated daily or hourly through `tracing-appender`.
//! `RUST_LOG` overrides the configured levels.
//!
//! ```ignore
//! use rax_logging::{LogConfig, RaxSubscriberBuilder};
//!
//! // pretty console while developing
//! RaxSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//!
//! // the guard flushes file output when dropped
//! let _guard = RaxSubscriberBuilder::new()
//!     .with_config(LogConfig::production("/var/log/raxlog".into()))
//!     .try_init()?;
//! ```

pub mod config;

pub use config::{ConsoleFormat, FileOutput, FileRotation, LogConfig};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured filter directives do not parse
    #[error("Invalid filter directives: {0}")]
    InvalidFilter(String),

    /// The log directory or file could not be created
    #[error("I/O error: {0}")]
    Io(String),

    /// The rolling file appender rejected its configuration
    #[error("File appender error: {0}")]
    FileAppender(String),

    /// A global subscriber is already installed
    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

impl From<std::io::Error> for LoggingError {
    fn from(err: std::io::Error) -> Self {
        LoggingError::Io(err.to_string())
    }
}

/// Builds and installs the global subscriber from a [`LogConfig`]
#[derive(Debug, Clone)]
pub struct RaxSubscriberBuilder {
    config: LogConfig,
}

impl RaxSubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Level for targets without an override
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Override the level of one target
    pub fn with_target_level(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config.targets.insert(target.into(), level.into());
        self
    }

    pub fn with_console(mut self, format: ConsoleFormat) -> Self {
        self.config.console = format;
        self
    }

    pub fn with_file_output(mut self, output: FileOutput) -> Self {
        self.config.file = Some(output);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(self.config.filter_directives())
                .map_err(|e| LoggingError::InvalidFilter(e.to_string())),
        }
    }

    fn layers(&self) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LoggingError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        match self.config.console {
            ConsoleFormat::Off => {}
            ConsoleFormat::Pretty => layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(self.config.ansi)
                    .with_target(true)
                    .boxed(),
            ),
            ConsoleFormat::Json => layers.push(json_layer(std::io::stdout)),
        }

        if let Some(output) = &self.config.file {
            let (writer, file_guard) = file_writer(output)?;
            guard = Some(file_guard);
            layers.push(json_layer(writer));
        }

        Ok((layers, guard))
    }

    /// Try to initialize the subscriber globally
    ///
    /// Returns a guard that must be kept alive while file output is in use,
    /// or an error if a global subscriber has already been set.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = self.env_filter()?;
        let (layers, guard) = self.layers()?;

        Registry::default()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    /// Initialize the subscriber globally
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been set or the
    /// configuration cannot be applied.
    pub fn init(self) -> Option<WorkerGuard> {
        self.try_init()
            .unwrap_or_else(|e| panic!("Failed to initialize logging: {e}"))
    }
}

impl Default for RaxSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattened JSON events carrying the current span
fn json_layer<W>(writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(writer)
        .boxed()
}

fn file_writer(output: &FileOutput) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&output.directory)?;

    let rotation = match output.rotation {
        FileRotation::Never => {
            let file = File::create(output.directory.join(format!("{}.log", output.prefix)))?;
            return Ok(tracing_appender::non_blocking(file));
        }
        FileRotation::Daily => Rotation::DAILY,
        FileRotation::Hourly => Rotation::HOURLY,
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(output.prefix.clone())
        .filename_suffix("log")
        .build(&output.directory)
        .map_err(|e| LoggingError::FileAppender(e.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// JSON lines to stdout at info level
pub fn init_default() {
    RaxSubscriberBuilder::new().init();
}

/// Pretty debug output to stdout
pub fn init_development() {
    RaxSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Initialize logging for testing (minimal output). Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_testing() {
    let _ = RaxSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
