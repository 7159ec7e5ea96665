//! Hierarchical logging
//!
//! Every run context carries a [`Logger`]: a `tracing` span nested under the
//! parent context's span, plus an indentation depth for console output.

use std::fmt::Display;
use tracing::{debug, error, info, info_span, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable overriding the log filter
pub const LOG_ENV_VAR: &str = "GANTRY_LOG";

/// Target used for child process output lines
pub const OUTPUT_TARGET: &str = "gantry::output";

/// Indentation per nesting level
const PADDING: usize = 2;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

impl Verbosity {
    /// Filter directives for this verbosity
    pub fn filter(self) -> String {
        match self {
            Verbosity::Silent => "off".to_string(),
            Verbosity::Quiet => format!("warn,{}=info", OUTPUT_TARGET),
            Verbosity::Normal => "info".to_string(),
            Verbosity::Verbose => "debug".to_string(),
        }
    }
}

/// Install the global subscriber; `GANTRY_LOG` takes precedence over verbosity
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter()));

    // A subscriber may already be installed (tests, embedding); keep it
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init();
}

/// A logger bound to one run context
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
    depth: usize,
}

impl Logger {
    /// Root logger with no enclosing span
    pub fn root() -> Self {
        Logger {
            span: Span::none(),
            depth: 0,
        }
    }

    /// Root logger for a named run
    pub fn for_run(name: &str) -> Self {
        Logger {
            span: info_span!(parent: None, "run", task = name),
            depth: 0,
        }
    }

    /// Child logger one level deeper, with a span nested under this one
    pub fn sub_logger(&self) -> Self {
        let depth = self.depth + 1;
        Logger {
            span: info_span!(parent: &self.span, "job", depth),
            depth,
        }
    }

    /// Span carrying this logger's events
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Nesting depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn pad(&self) -> String {
        " ".repeat(self.depth * PADDING)
    }

    pub fn info(&self, message: impl Display) {
        info!(parent: &self.span, "{}{}", self.pad(), message);
    }

    pub fn debug(&self, message: impl Display) {
        debug!(parent: &self.span, "{}{}", self.pad(), message);
    }

    pub fn warn(&self, message: impl Display) {
        warn!(parent: &self.span, "{}{}", self.pad(), message);
    }

    pub fn error(&self, message: impl Display) {
        error!(parent: &self.span, "{}{}", self.pad(), message);
    }

    /// Log one line of child process output
    pub fn output(&self, line: impl Display) {
        info!(target: OUTPUT_TARGET, parent: &self.span, "{}{}", self.pad(), line);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::root()
    }
}
