//! Structured logging facade.
//!
//! # Why
//! Every component that runs a background loop (dispatch, topic-change
//! serialization, bucketizing) needs to report local-recovery failures —
//! [`crate::CoreError::DispatchFailure`], `CalculatorFailure`, and friends —
//! without making those failures fatal to the loop. A small `Logger` trait
//! lets a host swap in its own sink; [`TracingLogger`] is the default,
//! bridging onto the `tracing` crate the way the rest of this pack does.
//!
//! # How
//! [`LogRecord`] carries a severity, a message, and a flat slice of
//! `(key, value)` fields rather than a typed attribute bag — every field
//! this crate ever logs (a topic name, a subscriber count, a cursor) is
//! already string-representable, so a richer type would just be ceremony.
use tracing::Level;

/// Log severity, ordered least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured log event.
#[derive(Debug)]
pub struct LogRecord<'a> {
    pub severity: LogSeverity,
    pub message: &'a str,
    pub fields: &'a [(&'a str, &'a str)],
}

/// Object-safe logging sink.
///
/// Implementations must return quickly — every call site here is on a hot
/// loop (dispatch, bucketizing) that cannot block on I/O.
pub trait Logger: Send + Sync + 'static {
    fn log(&self, record: &LogRecord<'_>);

    fn debug(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(&LogRecord {
            severity: LogSeverity::Debug,
            message,
            fields,
        });
    }

    fn info(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(&LogRecord {
            severity: LogSeverity::Info,
            message,
            fields,
        });
    }

    fn warn(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(&LogRecord {
            severity: LogSeverity::Warn,
            message,
            fields,
        });
    }

    fn error(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(&LogRecord {
            severity: LogSeverity::Error,
            message,
            fields,
        });
    }
}

/// Default [`Logger`] bridging onto the `tracing` crate's global
/// subscriber. A host wires up `tracing_subscriber` once at startup; this
/// type just emits events into whatever subscriber is installed.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, record: &LogRecord<'_>) {
        let level = match record.severity {
            LogSeverity::Debug => Level::DEBUG,
            LogSeverity::Info => Level::INFO,
            LogSeverity::Warn => Level::WARN,
            LogSeverity::Error => Level::ERROR,
        };
        // `tracing`'s macros require a literal level, so this dispatches
        // by hand rather than calling `tracing::event!(level, ...)`.
        match level {
            Level::DEBUG => tracing::debug!(fields = ?record.fields, "{}", record.message),
            Level::INFO => tracing::info!(fields = ?record.fields, "{}", record.message),
            Level::WARN => tracing::warn!(fields = ?record.fields, "{}", record.message),
            _ => tracing::error!(fields = ?record.fields, "{}", record.message),
        }
    }
}
