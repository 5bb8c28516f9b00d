//! Fabric Core Runtime Library.
//!
//! This crate implements the per-core runtime of a many-core neuromorphic
//! fabric: each core boots from a configuration blob in shared SDRAM, runs
//! an event-driven loop of prioritized interrupt handlers, relays packets in
//! batches over a scarce transport, and records results for the host.
//!
//! # Architecture
//!
//! * **Regions**: Fixed-offset reader for the blob header and region table.
//! * **Lifecycle**: Logical clock, tick budget, and the pause/resume handshake.
//! * **Dispatch**: Priority-ordered handler invocation with preemption points.
//! * **Relay**: Fixed-capacity batching with forced flush at pause.
//! * **Recording**: Append-only channels published at pause or exit.
//!
//! # Modules
//!
//! * `common`: Shared event types, constants, and error handling.
//! * `config`: Configuration loading and parsing.
//! * `fabric`: SDRAM window, transport, host link, and sleepers.
//! * `runtime`: The core runtime components.
//! * `sim`: Simulation harness and loaders.
//! * `stats`: Runtime statistics collection.

/// Shared event types, constants, and error types.
///
/// Provides the data passed between handlers and the error taxonomy used
/// throughout the runtime.
pub mod common;

/// Harness configuration.
///
/// Loads and parses TOML configuration files for memory layout, transport
/// behaviour, retry policy, handler priorities, and the demo run.
pub mod config;

/// Hardware-facing resources of a core.
///
/// The SDRAM window the blob lives in, the outbound packet transport, the
/// host signal link, and the sleepers retry loops wait on.
pub mod fabric;

/// The event-driven core runtime.
pub mod runtime;

/// Simulation harness, blob loaders, and execution orchestration.
///
/// Handles loading and writing configuration blobs and driving a core
/// through timer ticks and injected events in simulated time.
pub mod sim;

/// Runtime statistics collection and reporting.
pub mod stats;
