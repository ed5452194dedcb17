//! Diagnostic sink interface for heap damage reports.
//!
//! The heap uses the sink only to surface out-of-memory, double-free,
//! and corruption events as human-readable lines; it never drives
//! control flow through it. The default sink forwards to the `log`
//! facade under the `heap` target, so a kernel can route the lines to
//! its screen or serial console by installing a logger.

use core::fmt;

/// Severity of a diagnostic line, mapped by sinks to a color or tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Short ASCII tag for sinks without color support.
    pub fn tag(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warn",
            Severity::Error => "error",
        }
    }
}

/// Receiver for heap diagnostic lines.
pub trait DiagnosticSink {
    /// Reports one formatted line at the given severity.
    fn report(&mut self, severity: Severity, message: fmt::Arguments<'_>);
}

/// Default sink: forwards to the `log` facade under target `heap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&mut self, severity: Severity, message: fmt::Arguments<'_>) {
        match severity {
            Severity::Info => log::info!(target: "heap", "{}", message),
            Severity::Warning => log::warn!(target: "heap", "{}", message),
            Severity::Error => log::error!(target: "heap", "{}", message),
        }
    }
}
