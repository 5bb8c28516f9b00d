//! The event-driven core runtime.
//!
//! Components, leaves first: the region reader parses the configuration
//! blob; the lifecycle controller tracks logical time and the pause/resume
//! handshake; the dispatcher invokes handlers by priority; the relay buffer
//! batches inbound packets for the outbound transport; the recording sink
//! appends results to a host-visible region.

/// Packet relay application wiring the components together.
pub mod app;

/// Fixed-capacity inbound ring and outbound batch.
pub mod buffer;

/// Runtime context threaded through every handler, and `Core`.
pub mod context;

/// Priority-ordered interrupt dispatch.
pub mod dispatch;

/// Simulation lifecycle controller.
pub mod lifecycle;

/// Provenance region writer.
pub mod provenance;

/// Append-only recording channels.
pub mod recording;

/// Configuration blob region reader.
pub mod regions;

/// Packet batching and relay.
pub mod relay;

/// Bounded retry with back-off.
pub mod retry;

pub use context::{Core, RuntimeContext};
pub use dispatch::{DispatchPriorities, Dispatcher, EventHandler, Priority};
pub use lifecycle::{Lifecycle, Phase, RunCapability, RunLength, TickOutcome};
pub use recording::RecordingSink;
pub use regions::{RegionDescriptor, RegionTable};
pub use relay::{FlushReason, FlushReport, RelayBuffer};
pub use retry::RetryPolicy;
