//! Operational statistics counters
//!
//! A lazily populated map of category counters, shared across the pipeline.
//! Increments take a short critical section; the supervisor's timer drains
//! and resets the whole map every flush interval and emits one `STATS:`
//! debug line.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Counter keys with a fixed position in the flush line, in emit order.
/// `plugin::*` keys follow, lexicographically.
const FIXED_KEYS: [&str; 8] = [
    "packet", "invalid", "udp", "tcp", "port53", "dns", "question", "answer",
];

#[derive(Default)]
pub struct StatsAccumulator {
    counters: Mutex<HashMap<String, u64>>,
}

impl StatsAccumulator {
    pub fn new() -> StatsAccumulator {
        StatsAccumulator::default()
    }

    /// Bump a counter, creating it at zero on first use.
    pub fn increment(&self, key: &str) {
        let mut counters = self.counters.lock();
        match counters.get_mut(key) {
            Some(value) => *value += 1,
            None => {
                counters.insert(key.to_string(), 1);
            }
        }
    }

    pub fn plugin_delivered(&self, name: &str) {
        self.increment(&format!("plugin::{}", name));
    }

    pub fn plugin_dropped(&self, name: &str) {
        self.increment(&format!("plugin::{}::dropped", name));
    }

    /// Current value of a counter; absent counters read as zero.
    pub fn get(&self, key: &str) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }

    /// Atomically take every counter, leaving the map empty.
    pub fn snapshot_and_reset(&self) -> HashMap<String, u64> {
        std::mem::take(&mut *self.counters.lock())
    }

    /// Drain the counters into one debug log line.
    pub fn flush(&self) {
        let snapshot = self.snapshot_and_reset();
        log::debug!("{}", format_stats_line(&snapshot));
    }
}

/// Render a snapshot as `STATS: k1=v1, k2=v2, ...` with the fixed keys
/// first and plugin counters sorted after them. Keys that were never
/// incremented are omitted.
pub fn format_stats_line(snapshot: &HashMap<String, u64>) -> String {
    let mut parts = Vec::with_capacity(snapshot.len());

    for key in FIXED_KEYS {
        if let Some(value) = snapshot.get(key) {
            parts.push(format!("{}={}", key, value));
        }
    }

    let mut plugin_keys: Vec<&String> = snapshot
        .keys()
        .filter(|k| k.starts_with("plugin::"))
        .collect();
    plugin_keys.sort();
    for key in plugin_keys {
        if let Some(value) = snapshot.get(key.as_str()) {
            parts.push(format!("{}={}", key, value));
        }
    }

    format!("STATS: {}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation_and_increment() {
        let stats = StatsAccumulator::new();
        assert_eq!(0, stats.get("packet"));

        stats.increment("packet");
        stats.increment("packet");
        stats.increment("udp");

        assert_eq!(2, stats.get("packet"));
        assert_eq!(1, stats.get("udp"));
    }

    #[test]
    fn test_reset_is_total() {
        let stats = StatsAccumulator::new();
        stats.increment("packet");
        stats.increment("dns");

        let first = stats.snapshot_and_reset();
        assert_eq!(Some(&1), first.get("packet"));

        // Nothing incremented in between: the second snapshot is empty.
        let second = stats.snapshot_and_reset();
        assert!(second.is_empty());

        stats.increment("udp");
        let third = stats.snapshot_and_reset();
        assert_eq!(1, third.len());
        assert_eq!(Some(&1), third.get("udp"));
    }

    #[test]
    fn test_line_ordering() {
        let stats = StatsAccumulator::new();
        stats.increment("answer");
        stats.increment("packet");
        stats.increment("udp");
        stats.increment("dns");
        stats.plugin_delivered("server::stats");
        stats.plugin_delivered("client::stats");
        stats.plugin_dropped("server::stats");

        let line = format_stats_line(&stats.snapshot_and_reset());
        assert_eq!(
            "STATS: packet=1, udp=1, dns=1, answer=1, \
             plugin::client::stats=1, plugin::server::stats=1, \
             plugin::server::stats::dropped=1",
            line
        );
    }

    #[test]
    fn test_empty_line() {
        let stats = StatsAccumulator::new();
        assert_eq!("STATS: ", format_stats_line(&stats.snapshot_and_reset()));
    }
}
