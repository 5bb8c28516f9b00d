//! Common utilities and types used throughout the core runtime.
//!
//! This module provides the fundamental value types for events and packets,
//! the constants describing the configuration blob, and the error taxonomy
//! shared by every runtime component.

/// Configuration blob and region layout constants.
pub mod constants;

/// Event, packet and host command value types.
pub mod data;

/// Error taxonomy (configuration, logical, transport and recording faults).
pub mod error;

pub use data::{Event, EventSource, HostCommand, Packet};
pub use error::{
    ConfigError, DispatchError, Fault, HeaderError, LogicalFault, RecordError,
    RecordingInitError, TransportBusy,
};

pub use constants::{BLOB_MAGIC, BLOB_VERSION, WORD_BYTES};
