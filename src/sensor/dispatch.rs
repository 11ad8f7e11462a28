//! Event fan-out to plugin inboxes
//!
//! The dispatcher owns the binding table and posts every accepted event to
//! every live plugin without waiting for any of them. A full inbox drops
//! that plugin's copy of the event (counted); a closed inbox means the
//! worker died, and the binding is removed so later events skip it.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;

use crate::sensor::plugins::{DnsEvent, PluginBinding};
use crate::sensor::stats::StatsAccumulator;

pub struct Dispatcher {
    bindings: Vec<PluginBinding>,
    stats: Arc<StatsAccumulator>,
}

impl Dispatcher {
    pub fn new(bindings: Vec<PluginBinding>, stats: Arc<StatsAccumulator>) -> Dispatcher {
        Dispatcher { bindings, stats }
    }

    pub fn plugin_count(&self) -> usize {
        self.bindings.len()
    }

    /// Post one event to every live plugin. Never blocks and never holds a
    /// lock across the sends.
    pub fn dispatch(&mut self, event: Arc<DnsEvent>) {
        self.stats.increment("dns");
        self.stats.increment(if event.message.is_response() {
            "answer"
        } else {
            "question"
        });

        let mut lost_binding = false;
        for binding in self.bindings.iter_mut() {
            match binding.tx.try_send(event.clone()) {
                Ok(()) => self.stats.plugin_delivered(&binding.name),
                Err(TrySendError::Full(_)) => {
                    self.stats.plugin_dropped(&binding.name);
                }
                Err(TrySendError::Closed(_)) => {
                    log::info!(
                        "plugin {} inbox closed, removing it from dispatch",
                        binding.name
                    );
                    binding.alive = false;
                    lost_binding = true;
                }
            }
        }

        if lost_binding {
            self.bindings.retain(|b| b.alive);
        }
    }
}
