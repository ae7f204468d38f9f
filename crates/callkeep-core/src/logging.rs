//! Tracing subscriber setup for hosts that do not install their own
//!
//! Hosts embedding the coordinator in a larger process usually own the
//! global subscriber already; they only need the `rvoip_callkeep_core`
//! target enabled. Standalone hosts call [`setup_logging`] once at startup.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{CallKeepError, CallKeepResult};

/// Log target of this crate, for use in directives
pub const LOG_TARGET: &str = "rvoip_callkeep_core";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level for every target
    pub level: Level,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
    pub file_info: bool,
    /// Log span enter/exit
    pub log_spans: bool,
    pub app_name: String,
    /// Extra `target=level` directives, applied after `level`
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "callkeep".to_string(),
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Add a directive such as `rvoip_callkeep_core::translator=trace`
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Log this crate at `level` regardless of the default level
    pub fn with_call_level(self, level: Level) -> Self {
        let directive = format!("{}={}", LOG_TARGET, level);
        self.with_directive(directive)
    }

    /// Build the filter: `RUST_LOG` first, then `level`, then `directives`.
    ///
    /// Fails on the first directive that does not parse.
    pub fn env_filter(&self) -> CallKeepResult<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());
        for raw in &self.directives {
            let directive = Directive::from_str(raw).map_err(|e| {
                CallKeepError::invalid_configuration("log_directive", format!("{}: {}", raw, e))
            })?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Install a global fmt subscriber.
///
/// Fails with an internal error if a global subscriber is already
/// installed; the existing subscriber stays in place.
pub fn setup_logging(config: LoggingConfig) -> CallKeepResult<()> {
    let filter = config.env_filter()?;

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.with_writer(std::io::stdout).json().try_init()
    } else {
        builder.try_init()
    };
    installed
        .map_err(|e| CallKeepError::internal(format!("failed to install subscriber: {}", e)))?;

    tracing::info!(
        app_name = %config.app_name,
        version = crate::VERSION,
        "Call keeper logging ready"
    );
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> CallKeepResult<Level> {
    Level::from_str(level)
        .map_err(|_| CallKeepError::invalid_configuration("log_level", format!("Invalid log level: {}", level)))
}
