use parking_lot::Mutex;
use std::fmt;

/// Logging sink used by the sample stages
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
    /// Reports the cause of a component failure
    fn failure(&self, cause: &dyn fmt::Display) {
        self.error(&cause.to_string());
    }
}

/// Forwards everything to the [`log`] facade
#[derive(Default, Clone, Copy)]
pub struct LogLogger;

impl Logger for LogLogger {
    #[inline]
    fn info(&self, message: &str) {
        log::info!("{}", message);
    }
    #[inline]
    fn error(&self, message: &str) {
        log::error!("{}", message);
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Level {
    Info,
    Error,
}

/// Keeps log lines in memory
#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }
    pub fn contains(&self, pattern: &str) -> bool {
        self.lines.lock().iter().any(|(_, l)| l.contains(pattern))
    }
    pub fn count(&self, pattern: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|(_, l)| l.contains(pattern))
            .count()
    }
}

impl Logger for MemoryLogger {
    fn info(&self, message: &str) {
        self.lines.lock().push((Level::Info, message.to_owned()));
    }
    fn error(&self, message: &str) {
        self.lines.lock().push((Level::Error, message.to_owned()));
    }
}
