//! Event Types.
//!
//! This module defines the values that flow through the interrupt dispatch
//! core: the event sources a core can react to, the events themselves, the
//! inbound packet format and the commands a host may send to a paused or
//! running core.

/// Inbound packet delivered by the network.
///
/// Packets carry a routing key and an optional 32-bit payload. When no
/// payload is present the key itself is the datum being relayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    /// Routing key the packet arrived with.
    pub key: u32,
    /// Optional payload word.
    pub payload: Option<u32>,
}

impl Packet {
    /// Creates a packet carrying a payload.
    pub fn with_payload(key: u32, payload: u32) -> Self {
        Self {
            key,
            payload: Some(payload),
        }
    }

    /// Creates a key-only packet.
    pub fn key_only(key: u32) -> Self {
        Self { key, payload: None }
    }

    /// Returns the word forwarded in an outbound batch for this packet.
    pub fn word(&self) -> u32 {
        self.payload.unwrap_or(self.key)
    }
}

/// Hardware or software source an event is attributed to.
///
/// Every source must have exactly one registered handler before the run
/// phase begins; events on an unregistered source are a logical fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventSource {
    /// Network packet arrival.
    PacketReceived,

    /// DMA transfer completion.
    DmaComplete,

    /// Command delivered by the host toolchain.
    HostCommand,

    /// Periodic timer tick.
    TimerTick,

    /// Software-triggered background work.
    Background,
}

impl EventSource {
    /// All event sources in declaration order.
    pub const ALL: [EventSource; 5] = [
        EventSource::PacketReceived,
        EventSource::DmaComplete,
        EventSource::HostCommand,
        EventSource::TimerTick,
        EventSource::Background,
    ];

    /// Returns a short, stable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            EventSource::PacketReceived => "packet",
            EventSource::DmaComplete => "dma",
            EventSource::HostCommand => "host",
            EventSource::TimerTick => "timer",
            EventSource::Background => "background",
        }
    }
}

/// Commands the host may send to a core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostCommand {
    /// Leave the paused state and start a new run segment.
    Resume,

    /// Replace the tick budget used by the next run segment.
    SetRuntime {
        /// New tick budget.
        ticks: u32,
        /// Run without a budget.
        infinite: bool,
    },

    /// Terminate the run. The core finalizes and signals `exited`.
    Stop,

    /// Write provenance counters into the provenance region.
    GatherProvenance,
}

/// A single event awaiting or undergoing dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A packet arrived from the network.
    Packet(Packet),

    /// A DMA transfer finished.
    DmaComplete {
        /// Tag supplied when the transfer was queued.
        tag: u32,
    },

    /// The host sent a command.
    HostCommand(HostCommand),

    /// The periodic timer fired.
    TimerTick,

    /// Background work was requested.
    Background {
        /// First user argument.
        arg0: u32,
        /// Second user argument.
        arg1: u32,
    },
}

impl Event {
    /// Returns the source this event is dispatched through.
    pub fn source(&self) -> EventSource {
        match self {
            Event::Packet(_) => EventSource::PacketReceived,
            Event::DmaComplete { .. } => EventSource::DmaComplete,
            Event::HostCommand(_) => EventSource::HostCommand,
            Event::TimerTick => EventSource::TimerTick,
            Event::Background { .. } => EventSource::Background,
        }
    }
}
