//! Error taxonomy.
//!
//! Only `ConfigError` and `LogicalFault` are fatal; both are carried out of
//! the dispatch loop inside a `Fault`. `TransportBusy` and `RecordError` are
//! recoverable and never terminate a core.

use crate::common::data::EventSource;
use thiserror::Error;

/// Failure to parse the configuration blob header or region table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// The header or region table extends past mapped memory.
    #[error("blob truncated at {addr:#010x}: header or region table absent")]
    Truncated { addr: u64 },

    /// Word 0 does not hold the expected magic number.
    #[error("bad blob magic {found:#010x} (expected {expected:#010x})")]
    BadMagic { found: u32, expected: u32 },

    /// The major version does not match this runtime.
    #[error("unsupported blob version {found:#010x}")]
    UnsupportedVersion { found: u32 },

    /// The region table declares more regions than supported.
    #[error("blob declares {count} regions (max {max})")]
    TooManyRegions { count: u32, max: u32 },

    /// A region extends past mapped memory.
    #[error("region {index} at offset {offset:#x} (+{length:#x}) lies outside mapped memory")]
    RegionOutOfBounds { index: u32, offset: u32, length: u32 },
}

/// Malformed or missing configuration. Fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("required region {0} is absent")]
    MissingRegion(u32),

    #[error("region {index} holds {length} bytes, need at least {needed}")]
    RegionTooShort { index: u32, length: u32, needed: u32 },

    #[error("application identity mismatch: blob has {found:#010x}, core expects {expected:#010x}")]
    IdentityMismatch { found: u32, expected: u32 },

    #[error("timer period must be non-zero")]
    ZeroTimerPeriod,

    #[error("infinite-run flag {0} is not 0 or 1")]
    BadInfiniteFlag(u32),

    #[error("infinite run requested but this application requires a tick budget")]
    InfiniteRunUnsupported,

    #[error("invalid {field}: {value}")]
    InvalidParameter { field: &'static str, value: u32 },

    #[error("dispatch priorities are not strictly ordered: {0}")]
    PriorityOrder(String),

    #[error(transparent)]
    Recording(#[from] RecordingInitError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Handler registration failure during bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("a handler is already registered for {0:?}")]
    AlreadyRegistered(EventSource),

    #[error("{requested:?} cannot share priority {priority} with {existing:?}")]
    PriorityConflict {
        requested: EventSource,
        existing: EventSource,
        priority: i8,
    },

    #[error("registration for {0:?} attempted after the run phase began")]
    RegistrationClosed(EventSource),
}

/// Programming error detected while the core is running. Fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogicalFault {
    /// An event arrived on a source with no registered handler.
    #[error("event on unregistered source {0:?}")]
    UnregisteredSource(EventSource),
}

/// Unrecoverable fault; the core must abort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("configuration fault: {0}")]
    Config(#[from] ConfigError),

    #[error("logical fault: {0}")]
    Logical(#[from] LogicalFault),
}

impl From<HeaderError> for Fault {
    fn from(err: HeaderError) -> Self {
        Fault::Config(ConfigError::Header(err))
    }
}

/// The outbound transport refused a message after the permitted attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transport busy after {attempts} attempt(s)")]
pub struct TransportBusy {
    pub attempts: u32,
}

/// Failure to bring up the recording sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordingInitError {
    #[error("recording region is absent")]
    MissingRegion,

    #[error("recording region holds {length} bytes, need {needed}")]
    Truncated { length: u32, needed: u32 },

    #[error("{count} recording channels declared (max {max})")]
    TooManyChannels { count: u32, max: u32 },
}

/// A single record was not written. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Writing the record would exceed the channel's fixed capacity.
    #[error("channel {channel} overflow: {requested} bytes requested, {remaining} remaining")]
    Overflow {
        channel: u8,
        requested: usize,
        remaining: u32,
    },

    #[error("recording channel {0} does not exist")]
    UnknownChannel(u8),

    /// The sink was finalized and has not been reset by a resume.
    #[error("recording sink is finalized")]
    Sealed,
}
