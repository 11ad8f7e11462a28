//! Analyzer plugin registry and lifecycle
//!
//! Plugins register a constructor at link time under a symbolic name; the
//! registry filters that table by configuration, spawns each enabled
//! analyzer inside a failure boundary, and hands every survivor its own
//! worker task with a bounded inbox. The registry is immutable once loaded;
//! there is no hot reload.
//!
//! A constructor failure skips that plugin and the pipeline continues. A
//! `process` error is logged and the plugin stays loaded. A worker death is
//! detected by the dispatcher on the next post and the binding is dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sensor::endpoints::EndpointRoles;
use crate::sensor::logging::LogSink;
use crate::sensor::protocol::DnsPacket;
use crate::storage::{EndpointRow, EndpointStore, StorageError};

pub mod authorized;
pub mod endpoint_stats;
pub mod packet_logger;

#[derive(Debug, Display, From, Error)]
pub enum AnalyzerError {
    Storage(StorageError),
    /// A plugin option had the wrong shape; details are logged where the
    /// option is inspected.
    BadOption,
}

/// Everything an analyzer receives per accepted DNS message.
#[derive(Debug, Clone)]
pub struct DnsEvent {
    pub ts: DateTime<Utc>,
    pub message: DnsPacket,
    pub roles: EndpointRoles,
    pub server: EndpointRow,
    pub client: EndpointRow,
}

/// The analyzer capability: a name, per-event processing and a shutdown
/// hook. Construction happens through the registry's constructor table.
#[async_trait]
pub trait Analyzer: Send {
    fn name(&self) -> &'static str;

    async fn process(&mut self, event: &DnsEvent) -> Result<(), AnalyzerError>;

    async fn shutdown(&mut self) -> Result<(), AnalyzerError> {
        Ok(())
    }
}

/// Shared collaborators handed to every constructor.
pub struct AnalyzerContext {
    pub store: Arc<EndpointStore>,
    pub sink: LogSink,
}

pub type Constructor =
    fn(&toml::value::Table, &AnalyzerContext) -> Result<Box<dyn Analyzer>, AnalyzerError>;

/// The link-time plugin table.
pub fn builtin() -> Vec<(&'static str, Constructor)> {
    vec![
        ("client::stats", endpoint_stats::spawn_client),
        ("packet::logger", packet_logger::spawn),
        ("server::authorized", authorized::spawn),
        ("server::stats", endpoint_stats::spawn_server),
    ]
}

/// A live plugin as the dispatcher sees it.
pub struct PluginBinding {
    pub name: String,
    pub tx: mpsc::Sender<Arc<DnsEvent>>,
    pub alive: bool,
}

/// A live plugin as the supervisor sees it: something to await at shutdown.
pub struct PluginWorker {
    pub name: String,
    pub handle: JoinHandle<()>,
}

pub struct PluginRegistry {
    pub bindings: Vec<PluginBinding>,
    pub workers: Vec<PluginWorker>,
}

impl PluginRegistry {
    /// Filter the constructor table by configuration and spawn the enabled
    /// analyzers. Never fails: a broken plugin is skipped, not fatal.
    pub fn load(
        available: &[(&'static str, Constructor)],
        config: &BTreeMap<String, toml::Value>,
        ctx: &AnalyzerContext,
        inbox_capacity: usize,
    ) -> PluginRegistry {
        let inbox_capacity = inbox_capacity.max(1);
        let mut bindings = Vec::new();
        let mut workers = Vec::new();

        for &(name, constructor) in available {
            let options = match config.get(name).and_then(|v| v.as_table()) {
                Some(table) => table,
                None => {
                    log::info!("plugin {} has no configuration table, skipping", name);
                    continue;
                }
            };

            if !enabled(options) {
                log::info!("plugin {} not enabled, skipping", name);
                continue;
            }

            let analyzer = match constructor(options, ctx) {
                Ok(analyzer) => analyzer,
                Err(e) => {
                    log::warn!("plugin {} failed to start: {}", name, e);
                    continue;
                }
            };

            let (tx, rx) = mpsc::channel(inbox_capacity);
            let handle = spawn_worker(name, analyzer, rx);
            bindings.push(PluginBinding {
                name: name.to_string(),
                tx,
                alive: true,
            });
            workers.push(PluginWorker {
                name: name.to_string(),
                handle,
            });
        }

        let loaded: Vec<&str> = bindings.iter().map(|b| b.name.as_str()).collect();
        log::info!("loaded plugins: [{}]", loaded.join(", "));

        PluginRegistry { bindings, workers }
    }
}

/// A plugin is enabled only by the exact integer 1.
fn enabled(options: &toml::value::Table) -> bool {
    matches!(options.get("enable"), Some(toml::Value::Integer(1)))
}

/// Run one analyzer on its own task, draining its inbox in arrival order.
/// The worker ends when every sender is gone; remaining state is flushed
/// through `shutdown`.
pub fn spawn_worker(
    name: &'static str,
    mut analyzer: Box<dyn Analyzer>,
    mut rx: mpsc::Receiver<Arc<DnsEvent>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = analyzer.process(&event).await {
                log::warn!("plugin {} failed to process event: {}", name, e);
            }
        }
        if let Err(e) = analyzer.shutdown().await {
            log::warn!("plugin {} failed to shut down cleanly: {}", name, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, toml::Value)]) -> toml::Value {
        let mut table = toml::value::Table::new();
        for (k, v) in pairs {
            table.insert(k.to_string(), v.clone());
        }
        toml::Value::Table(table)
    }

    #[test]
    fn test_enable_gating() {
        let enabled_table = options(&[("enable", toml::Value::Integer(1))]);
        assert!(enabled(enabled_table.as_table().unwrap()));

        for value in [
            toml::Value::Integer(0),
            toml::Value::Integer(2),
            toml::Value::Boolean(true),
            toml::Value::String("1".to_string()),
        ] {
            let table = options(&[("enable", value)]);
            assert!(!enabled(table.as_table().unwrap()));
        }

        let empty = options(&[]);
        assert!(!enabled(empty.as_table().unwrap()));
    }

    #[tokio::test]
    async fn test_registry_skips_unconfigured_and_broken() {
        fn broken(
            _: &toml::value::Table,
            _: &AnalyzerContext,
        ) -> Result<Box<dyn Analyzer>, AnalyzerError> {
            Err(AnalyzerError::BadOption)
        }

        struct Noop;

        #[async_trait]
        impl Analyzer for Noop {
            fn name(&self) -> &'static str {
                "noop"
            }

            async fn process(&mut self, _: &DnsEvent) -> Result<(), AnalyzerError> {
                Ok(())
            }
        }

        fn noop(
            _: &toml::value::Table,
            _: &AnalyzerContext,
        ) -> Result<Box<dyn Analyzer>, AnalyzerError> {
            Ok(Box::new(Noop))
        }

        let table: Vec<(&'static str, Constructor)> =
            vec![("broken", broken), ("noop", noop), ("unconfigured", noop)];

        let mut config = BTreeMap::new();
        config.insert(
            "broken".to_string(),
            options(&[("enable", toml::Value::Integer(1))]),
        );
        config.insert(
            "noop".to_string(),
            options(&[("enable", toml::Value::Integer(1))]),
        );
        // "unconfigured" intentionally absent; also try a non-table value.
        config.insert("bogus".to_string(), toml::Value::Integer(7));

        let ctx = AnalyzerContext {
            store: Arc::new(EndpointStore::connect(":memory:").await.unwrap()),
            sink: LogSink::new("test"),
        };

        let registry = PluginRegistry::load(&table, &config, &ctx, 8);
        let names: Vec<&str> = registry.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(vec!["noop"], names);
        assert_eq!(1, registry.workers.len());
    }
}
