//! The logging facade: a small `Logger` trait wrapping `tracing`, matching
//! the `log(level, message, context)` shape the engine uses internally
//! regardless of which logging backend a caller swaps in.

use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_tracing(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// A single structured field attached to a log line: which subscriber or
/// engine component produced it.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub source: &'static str,
}

impl LogContext {
    pub fn new(source: &'static str) -> Self {
        Self { source }
    }
}

/// Abstracts over the logging backend. The engine and bundled subscribers
/// take `Arc<dyn Logger>` rather than calling `tracing::*!` macros directly,
/// so a caller can redirect or silence engine logging without an env-filter
/// dance.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, context: &LogContext);
}

/// The default [`Logger`], forwarding to `tracing` with `source` as a
/// structured field.
#[derive(Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, context: &LogContext) {
        match level.as_tracing() {
            Level::DEBUG => tracing::debug!(source = context.source, "{}", message),
            Level::INFO => tracing::info!(source = context.source, "{}", message),
            Level::WARN => tracing::warn!(source = context.source, "{}", message),
            Level::ERROR => tracing::error!(source = context.source, "{}", message),
            _ => tracing::trace!(source = context.source, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_logger_does_not_panic_on_any_level() {
        let logger = TracingLogger;
        let ctx = LogContext::new("test");
        logger.log(LogLevel::Debug, "debug message", &ctx);
        logger.log(LogLevel::Info, "info message", &ctx);
        logger.log(LogLevel::Warn, "warn message", &ctx);
        logger.log(LogLevel::Error, "error message", &ctx);
    }
}
