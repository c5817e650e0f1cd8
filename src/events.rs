//! Injected logging interface.
//!
//! Components never log through process-wide state directly. Each one holds an [`EventLog`]
//! handle; [`LogFacade`] forwards to the `log` crate and [`MemoryLog`] keeps entries for tests.

use log::Level;
use std::sync::{Arc, Mutex};

/// Sink for diagnostics produced during extraction
pub trait EventLog: Send + Sync {
    fn record(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.record(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.record(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.record(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.record(Level::Error, message);
    }
}

/// Shared handle passed to every component
pub type SharedLog = Arc<dyn EventLog>;

/// Forwards every entry to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl EventLog for LogFacade {
    fn record(&self, level: Level, message: &str) {
        log::log!(target: "page_graph", level, "{}", message);
    }
}

/// Default handle backed by [`LogFacade`]
pub fn facade() -> SharedLog {
    Arc::new(LogFacade)
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of every recorded entry
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of entries at the given level
    pub fn count(&self, level: Level) -> usize {
        self.entries().iter().filter(|(l, _)| *l == level).count()
    }

    /// Whether any entry contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|(_, m)| m.contains(needle))
    }
}

impl EventLog for MemoryLog {
    fn record(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}
