//! Leveled log sink handed to plugins
//!
//! Analyzers do not talk to the log facade directly; they get a `LogSink`
//! tied to their component name. Posting never fails the caller.

/// Log levels accepted by the sink. `Notice` maps onto the facade's info
/// level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkLevel {
    Debug,
    Notice,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogSink {
    component: String,
}

impl LogSink {
    pub fn new(component: impl Into<String>) -> LogSink {
        LogSink {
            component: component.into(),
        }
    }

    pub fn post(&self, level: SinkLevel, message: &str) {
        match level {
            SinkLevel::Debug => log::debug!("[{}] {}", self.component, message),
            SinkLevel::Notice => log::info!("[{}] {}", self.component, message),
            SinkLevel::Warning => log::warn!("[{}] {}", self.component, message),
            SinkLevel::Error => log::error!("[{}] {}", self.component, message),
        }
    }
}
