//! The Argos sensor pipeline
//!
//! Frames flow from the capture source through the decoder and DNS parser,
//! endpoint roles are normalized against the store, and every accepted event
//! is fanned out to the loaded analyzer plugins:
//!
//! capture -> decode -> protocol -> endpoints -> dispatch -> (plugins)
//!
//! The supervisor wires the stages together and owns their lifecycle; the
//! stats accumulator is instrumented along the way and flushed periodically.

/// Low-level buffer operations for DNS message decoding
pub mod buffer;

/// Live packet capture source
pub mod capture;

/// Daemon configuration file and defaults
pub mod config;

/// Link/network/transport header decoding
pub mod decode;

/// Event fan-out to plugin inboxes
pub mod dispatch;

/// Client/server role normalization and endpoint rows
pub mod endpoints;

/// Leveled log sink handed to plugins
pub mod logging;

/// Analyzer plugin registry and lifecycle
pub mod plugins;

/// DNS protocol definitions and message parsing
pub mod protocol;

/// Coordinated shutdown signaling
pub mod shutdown;

/// Operational statistics counters
pub mod stats;

/// Pipeline supervisor and event loop
pub mod supervisor;
