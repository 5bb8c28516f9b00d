//! Simulation harness and loaders.
//!
//! Loads configuration blobs from disk, writes minimal blobs for tests and
//! demos, and drives a core through timer ticks and injected events.

/// Blob loading and writing.
pub mod loader;

/// Deterministic event scheduler driving a `Core`.
pub mod simulator;

pub use loader::{ImageBuilder, RelayImage};
pub use simulator::Simulator;
