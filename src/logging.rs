//! Logging setup for component-container
//!
//! The container emits `tracing` events under the `component_container`
//! target: registrations and creations at `DEBUG`, cache hits and chain
//! lookups at `TRACE`, swallowed disposal failures at `WARN`. This module
//! installs a `tracing-subscriber` for applications that do not bring
//! their own.
//!
//! # Features
//!
//! - `logging` - Emit events (default)
//! - `logging-json` - JSON structured output
//! - `logging-pretty` - Human-readable output
//!
//! # Example
//!
//! ```rust,ignore
//! use component_container::logging;
//!
//! logging::init();
//!
//! // Creation traces from the container, warnings from everything else
//! logging::builder()
//!     .warn()
//!     .with_container_level(tracing::Level::TRACE)
//!     .pretty()
//!     .init();
//! ```

use tracing::Level;

/// Target every container event is emitted under
pub const TARGET: &str = "component_container";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logging
    #[default]
    Json,
    /// Multi-line human-readable output
    Pretty,
    /// Single-line output
    Compact,
}

/// Builder for the global subscriber
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    container_level: Option<Level>,
    format: LogFormat,
    container_only: bool,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            container_level: None,
            format: LogFormat::Json,
            container_only: false,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
        }
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum level for every target
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    pub fn error(self) -> Self {
        self.with_level(Level::ERROR)
    }

    /// Separate minimum level for container events
    pub fn with_container_level(mut self, level: Level) -> Self {
        self.container_level = Some(level);
        self
    }

    /// Drop events from every other target
    pub fn container_only(mut self) -> Self {
        self.container_only = true;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// `EnvFilter` directives for the configured levels
    pub fn directives(&self) -> String {
        let container = self.container_level.unwrap_or(self.level);
        if self.container_only {
            format!("{TARGET}={container}")
        } else if self.container_level.is_some() {
            format!("{},{TARGET}={container}", self.level)
        } else {
            self.level.to_string()
        }
    }

    /// Install the subscriber; fails if one is already installed.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> crate::Result<()> {
        use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

        let filter = EnvFilter::new(self.directives());
        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_thread_names(self.with_thread_names)
            .with_target(true);

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => base.json().boxed(),
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
            .map_err(|err| crate::DiError::Internal(format!("logging already initialized: {err}")))
    }

    /// Without a subscriber feature there is nothing to install.
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn try_init(self) -> crate::Result<()> {
        Ok(())
    }

    /// Install the subscriber, ignoring an already installed one.
    pub fn init(self) {
        let _ = self.try_init();
    }
}

pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// JSON if `logging-json` is enabled, otherwise pretty.
pub fn init() {
    if cfg!(feature = "logging-json") {
        init_json();
    } else {
        init_pretty();
    }
}

pub fn init_json() {
    builder().json().debug().init();
}

pub fn init_pretty() {
    builder().pretty().debug().init();
}

/// Container events only
pub fn init_container_only() {
    builder().container_only().debug().init();
}
