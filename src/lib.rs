//! Argos passive DNS monitor
//!
//! A long-running daemon that observes network traffic on a live interface,
//! extracts DNS messages from UDP and TCP flows, and fans each parsed message
//! out to a set of analyzer plugins that persist or aggregate the data.
//!
//! # Features
//!
//! * Live capture with BPF filtering and automatic reopen on capture errors
//! * Link-layer aware decoding (Ethernet, Linux cooked capture, loopback)
//! * Client/server role normalization from the DNS QR bit
//! * SQLite-backed endpoint tracking with atomic find-or-create
//! * Bounded-inbox analyzer plugins with drop-newest overload isolation
//! * Periodic operational statistics flushed to the log
//!
//! # Architecture
//!
//! The crate is divided into two main modules:
//! * `sensor` - Capture, decoding, parsing and the dispatch pipeline
//! * `storage` - The relational entity store consumed by the pipeline

/// Capture and dispatch pipeline
pub mod sensor;

/// SQLite entity store for endpoints and analyzer data
pub mod storage;
