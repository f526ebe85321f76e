//! Injected diagnostics
//!
//! Subsystems never reach for a process-wide logger on their own. Each one is
//! handed an `Arc<dyn Diagnostics>` when it is constructed and reports through
//! it. The default sink, [`LogDiagnostics`], forwards into the `log` facade so
//! an application that installs `env_logger` sees everything as usual, while
//! tests can swap in [`CapturingDiagnostics`] and assert on what was reported.

use std::fmt;
use std::sync::{Arc, Mutex};

pub use log::Level;

/// A sink for diagnostic records produced by the rendering core
pub trait Diagnostics: Send + Sync + fmt::Debug {
    /// Whether records at `level` for `target` would be kept.
    ///
    /// Callers check this before formatting anything expensive.
    fn enabled(&self, level: Level, target: &str) -> bool;

    /// Accept one record
    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>);
}

/// Forwards records to the `log` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn enabled(&self, level: Level, target: &str) -> bool {
        log::log_enabled!(target: target, level)
    }

    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        log::log!(target: target, level, "{}", args);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
    fn enabled(&self, _level: Level, _target: &str) -> bool {
        false
    }

    fn record(&self, _level: Level, _target: &str, _args: fmt::Arguments<'_>) {}
}

/// A record kept by [`CapturingDiagnostics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    /// Severity
    pub level: Level,
    /// Subsystem target, e.g. `render_core::pool`
    pub target: String,
    /// Formatted message
    pub message: String,
}

/// Keeps records in memory, filtered by a maximum level
#[derive(Debug)]
pub struct CapturingDiagnostics {
    max_level: Level,
    records: Mutex<Vec<CapturedRecord>>,
}

impl CapturingDiagnostics {
    /// Capture records up to and including `max_level`
    pub fn new(max_level: Level) -> Self {
        Self {
            max_level,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything captured so far
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Captured records at exactly `level`
    pub fn records_at(&self, level: Level) -> Vec<CapturedRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level)
            .collect()
    }

    /// Drop everything captured so far
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl Diagnostics for CapturingDiagnostics {
    fn enabled(&self, level: Level, _target: &str) -> bool {
        level <= self.max_level
    }

    fn record(&self, level: Level, target: &str, args: fmt::Arguments<'_>) {
        if !self.enabled(level, target) {
            return;
        }
        if let Ok(mut records) = self.records.lock() {
            records.push(CapturedRecord {
                level,
                target: target.to_string(),
                message: args.to_string(),
            });
        }
    }
}

/// The sink used by the convenience constructors
pub fn default_diagnostics() -> Arc<dyn Diagnostics> {
    Arc::new(LogDiagnostics)
}

/// Report through a `Diagnostics` sink, formatting only when enabled
macro_rules! report {
    ($diag:expr, $level:expr, $target:expr, $($arg:tt)+) => {{
        let sink: &dyn $crate::foundation::diagnostics::Diagnostics = &*$diag;
        if sink.enabled($level, $target) {
            sink.record($level, $target, format_args!($($arg)+));
        }
    }};
}

pub(crate) use report;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capturing_filters_by_level() {
        let diag = CapturingDiagnostics::new(Level::Debug);
        report!(&diag, Level::Trace, "test", "dropped {}", 1);
        report!(&diag, Level::Debug, "test", "kept {}", 2);
        report!(&diag, Level::Error, "test", "kept {}", 3);

        let records = diag.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "kept 2");
        assert_eq!(records[1].level, Level::Error);
        assert_eq!(diag.records_at(Level::Error).len(), 1);

        diag.clear();
        assert!(diag.records().is_empty());
    }

    #[test]
    fn test_null_diagnostics_is_never_enabled() {
        let diag = NullDiagnostics;
        assert!(!diag.enabled(Level::Error, "anything"));
    }

    #[test]
    fn test_log_diagnostics_forwards_without_panicking() {
        let _ = env_logger::builder().is_test(true).try_init();
        let diag = default_diagnostics();
        report!(diag, Level::Info, "render_core::test", "hello {}", "world");
    }
}
