//! External collaborators of the core runtime.
//!
//! The runtime never touches hardware directly. The shared SDRAM window, the
//! outbound transport, the host handshake device and the wall clock used for
//! back-off are all modeled here so they can be substituted in tests.

/// Injectable sleep/clock used by bounded retry.
pub mod clock;

/// Host handshake signals (ready-to-read, resume, exited).
pub mod host;

/// Shared SDRAM window holding the configuration blob and output regions.
pub mod memory;

/// Outbound transport, routing header and loopback implementation.
pub mod transport;

pub use clock::{ManualClock, Sleeper, ThreadSleeper};
pub use host::{CoreState, HostHandle, HostLink};
pub use memory::{AccessFault, Sdram};
pub use transport::{LoopbackTransport, OutboundMessage, Routing, Transport, TransportLog};
