//! Subscriber settings
//!
//! A [`LogConfig`] deserializes from the `[logging]` section of an embedding
//! application's config file. Every field has a default, so a partial section
//! is enough.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What the subscriber renders and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for every target without an override; `RUST_LOG` replaces it
    pub level: String,

    /// Per-target levels, e.g. `rax_storage = "trace"`
    pub targets: BTreeMap<String, String>,

    pub console: ConsoleFormat,

    /// Color escapes in pretty console output
    pub ansi: bool,

    /// JSON lines written to a log directory
    pub file: Option<FileOutput>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
            console: ConsoleFormat::Json,
            ansi: false,
            file: None,
        }
    }
}

impl LogConfig {
    /// Pretty colored console at debug level
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Pretty,
            ansi: true,
            ..Default::default()
        }
    }

    /// Daily rotated JSON files in `dir`, no console
    pub fn production(dir: PathBuf) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileOutput::daily(dir)),
            ..Default::default()
        }
    }

    /// Warnings and errors only, plain text for captured test output
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleFormat::Pretty,
            ..Default::default()
        }
    }

    /// `EnvFilter` directives: the level, then each target override
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.targets
                    .iter()
                    .map(|(target, level)| format!("{target}={level}")),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Console rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleFormat {
    /// No console output
    Off,
    /// Human-readable lines
    Pretty,
    /// One JSON object per event
    #[default]
    Json,
}

/// File output. Files are named `<prefix>.log`, with a date suffix when
/// rotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutput {
    pub directory: PathBuf,
    pub prefix: String,
    #[serde(default)]
    pub rotation: FileRotation,
}

impl FileOutput {
    /// `raxlog` files in `directory`, one per day
    pub fn daily(directory: PathBuf) -> Self {
        Self {
            directory,
            prefix: "raxlog".to_string(),
            rotation: FileRotation::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRotation {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated when the subscriber starts
    Never,
}
