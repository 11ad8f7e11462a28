//! Pipeline supervisor and event loop
//!
//! The single entry point that wires capture, decode, parse, endpoint
//! resolution and dispatch into a running pipeline, owns the periodic stats
//! flush, and walks the lifecycle state machine:
//!
//! Init -> Starting -> Running -> Draining -> Stopped
//!                  \-> Failed (startup errors only)
//!
//! No failure on a single event leaves Running; only capture-open or
//! store/config failures are fatal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};
use tokio::sync::mpsc;

use crate::sensor::capture::{CaptureConfig, CaptureError, CaptureSource, FrameBatch};
use crate::sensor::config::Config;
use crate::sensor::decode::{self, Transport};
use crate::sensor::dispatch::Dispatcher;
use crate::sensor::endpoints::{EndpointResolver, EndpointRoles};
use crate::sensor::logging::LogSink;
use crate::sensor::plugins::{self, AnalyzerContext, DnsEvent, PluginRegistry};
use crate::sensor::protocol;
use crate::sensor::shutdown::ShutdownCoordinator;
use crate::sensor::stats::StatsAccumulator;
use crate::storage::{EndpointStore, StorageError};

#[derive(Debug, Display, From, Error)]
pub enum SupervisorError {
    Capture(CaptureError),
    Storage(StorageError),
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, SupervisorError>;

/// Depth of the capture-to-decode channel, in batches.
const FRAME_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Init,
    Starting,
    Running,
    Draining,
    Failed,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Init => "init",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Draining => "draining",
            SupervisorState::Failed => "failed",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct Supervisor {
    config: Config,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(config: Config) -> Supervisor {
        Supervisor {
            config,
            state: SupervisorState::Init,
        }
    }

    fn enter(&mut self, next: SupervisorState) {
        log::debug!("supervisor {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the pipeline until a termination signal arrives.
    pub async fn run(mut self) -> Result<()> {
        self.enter(SupervisorState::Starting);

        let store = match EndpointStore::connect(&self.config.database).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                self.enter(SupervisorState::Failed);
                log::error!("cannot open database {}: {}", self.config.database, e);
                return Err(e.into());
            }
        };

        let stats = Arc::new(StatsAccumulator::new());
        let ctx = AnalyzerContext {
            store: store.clone(),
            sink: LogSink::new("plugin"),
        };
        let registry = PluginRegistry::load(
            &plugins::builtin(),
            &self.config.plugins,
            &ctx,
            self.config.inbox_capacity,
        );
        let PluginRegistry { bindings, workers } = registry;

        let shutdown = ShutdownCoordinator::new();
        let source = CaptureSource::new(
            CaptureConfig {
                device: self.config.device.clone(),
                snaplen: self.config.snaplen,
                promisc: self.config.promisc,
                timeout_ms: self.config.timeout,
                filter: self.config.filter.clone(),
            },
            shutdown.flag(),
        );

        let (mut cap, link) = match source.open_live() {
            Ok(opened) => opened,
            Err(e) => {
                self.enter(SupervisorState::Failed);
                log::error!("cannot open capture on {}: {}", self.config.device, e);
                return Err(e.into());
            }
        };

        if let Err(e) = source.install_filter(&mut cap) {
            log::warn!(
                "filter {:?} rejected, capturing unfiltered: {}",
                self.config.filter,
                e
            );
        }

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let capture_thread = match source.spawn(cap, link, frame_tx) {
            Ok(handle) => handle,
            Err(e) => {
                self.enter(SupervisorState::Failed);
                log::error!("cannot start capture thread: {}", e);
                return Err(e.into());
            }
        };

        let dispatcher = Dispatcher::new(bindings, stats.clone());
        let resolver = EndpointResolver::new(store.clone());
        let mut pipeline = tokio::spawn(run_pipeline(
            frame_rx,
            resolver,
            dispatcher,
            stats.clone(),
        ));

        self.enter(SupervisorState::Running);
        log::info!("argos running on {}", self.config.device);

        let mut flush_timer =
            tokio::time::interval(Duration::from_secs(self.config.stats_interval.max(1)));
        flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        flush_timer.tick().await; // the first tick completes immediately

        let termination = termination_signal();
        tokio::pin!(termination);

        let mut pipeline_done = false;
        loop {
            tokio::select! {
                _ = flush_timer.tick() => {
                    stats.flush();
                }
                signal = &mut termination => {
                    log::info!("received {}, shutting down", signal);
                    break;
                }
                _ = &mut pipeline => {
                    // The capture side went away without a signal; drain and
                    // stop rather than run a dead pipeline.
                    log::warn!("pipeline ended unexpectedly, shutting down");
                    pipeline_done = true;
                    break;
                }
            }
        }

        self.enter(SupervisorState::Draining);
        shutdown.trigger();

        let drain = Duration::from_secs(self.config.drain_timeout);
        let join_capture = tokio::task::spawn_blocking(move || capture_thread.join());
        match tokio::time::timeout(drain, join_capture).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(_))) => log::info!("capture thread exited abnormally"),
            Ok(Err(e)) => log::info!("capture join failed: {}", e),
            Err(_) => log::warn!("capture thread did not stop within {:?}", drain),
        }

        // The capture thread owned the frame sender, so the pipeline sees
        // end-of-stream once it has drained the queued batches.
        if !pipeline_done && tokio::time::timeout(drain, &mut pipeline).await.is_err() {
            log::warn!("decode queue did not drain within {:?}", drain);
            pipeline.abort();
        }

        // One grace window shared by every plugin: the workers drain their
        // inboxes concurrently, so awaiting them in turn against a common
        // deadline bounds this step by plugin_grace in total.
        let grace = Duration::from_secs(self.config.plugin_grace);
        let grace_deadline = tokio::time::Instant::now() + grace;
        for worker in workers {
            match tokio::time::timeout_at(grace_deadline, worker.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::info!("plugin {} exited abnormally: {}", worker.name, e),
                Err(_) => log::warn!(
                    "plugin {} did not finish within {:?}, dropping remaining events",
                    worker.name,
                    grace
                ),
            }
        }

        stats.flush();
        self.enter(SupervisorState::Stopped);
        log::info!("argos stopped");
        Ok(())
    }
}

/// The decode/parse/resolve/dispatch flow, serialized on one task.
///
/// Runs until the frame channel closes. Exposed so integration tests can
/// drive the pipeline with synthetic frames.
pub async fn run_pipeline(
    mut frames: mpsc::Receiver<FrameBatch>,
    resolver: EndpointResolver,
    mut dispatcher: Dispatcher,
    stats: Arc<StatsAccumulator>,
) {
    while let Some(batch) = frames.recv().await {
        for frame in batch.frames {
            stats.increment("packet");

            let segment = match decode::decode(batch.link, &frame.data) {
                Ok(segment) => segment,
                Err(_) => {
                    stats.increment("invalid");
                    continue;
                }
            };

            stats.increment(match segment.proto {
                Transport::Udp => "udp",
                Transport::Tcp => "tcp",
            });
            if segment.involves_port(53) {
                stats.increment("port53");
            }

            let message = match protocol::parse_message(segment.dns_payload()) {
                Ok(message) => message,
                Err(_) => continue, // not DNS; dropped silently
            };

            let roles = EndpointRoles::from_segment(&segment, message.is_response());
            let (server, client) = match resolver.resolve(&roles).await {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!("dropping event, endpoint store unavailable: {}", e);
                    continue;
                }
            };

            dispatcher.dispatch(Arc::new(DnsEvent {
                ts: frame.ts,
                message,
                roles,
                server,
                client,
            }));
        }
    }
}

/// Resolves when a termination signal arrives.
async fn termination_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = term.recv() => "SIGTERM",
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "interrupt"
    }
}
