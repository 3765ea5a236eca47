//! The Report sink: the external collaborator that receives leveled
//! diagnostic messages from the pipeline (spec §6 "Observable logging").
//!
//! The core never decides *where* messages go — it only ever talks to a
//! `ReportSink`. `TracingReport` is the default, backed by the `tracing`
//! crate; `NullReport` discards everything, useful in tests.

use std::fmt;

/// Diagnostic severity, from most to least important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
}

pub trait ReportSink: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn error(&self, message: impl fmt::Display) {
        self.log(Level::Error, &message.to_string());
    }

    fn warning(&self, message: impl fmt::Display) {
        self.log(Level::Warning, &message.to_string());
    }

    fn info(&self, message: impl fmt::Display) {
        self.log(Level::Info, &message.to_string());
    }
}

/// Routes every message through `tracing`, at the event level matching
/// `Level`. This is what the CLI wires up by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReport;

impl ReportSink for TracingReport {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Error => tracing::error!("{message}"),
            Level::Warning => tracing::warn!("{message}"),
            Level::Info => tracing::info!("{message}"),
            Level::Verbose => tracing::debug!("{message}"),
            Level::Debug => tracing::trace!("{message}"),
        }
    }
}

/// Discards every message. Used by tests that don't care about output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReport;

impl ReportSink for NullReport {
    fn log(&self, _level: Level, _message: &str) {}
}
