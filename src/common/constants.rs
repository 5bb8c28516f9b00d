//! Configuration Blob Constants.
//!
//! Fixed values shared between this runtime and the host toolchain that
//! lays out the configuration blob. All multi-byte quantities in the blob
//! are little-endian 32-bit words.

/// Magic number at word 0 of every configuration blob.
pub const BLOB_MAGIC: u32 = 0xAD13_0AD6;

/// Blob format version written by the current host toolchain.
pub const BLOB_VERSION: u32 = 0x0001_0000;

/// Mask selecting the major half of the version word.
///
/// Blobs are accepted when their major version matches `BLOB_VERSION`.
pub const BLOB_VERSION_MAJOR_MASK: u32 = 0xFFFF_0000;

/// Number of words preceding the region table (magic, version, count).
pub const HEADER_WORDS: u64 = 3;

/// Number of words per region table entry (offset, length).
pub const TABLE_ENTRY_WORDS: u64 = 2;

/// Upper bound on declared regions in a single blob.
pub const MAX_REGIONS: u32 = 32;

/// Size of a configuration word in bytes.
pub const WORD_BYTES: u64 = 4;

/// Words in the lifecycle (system) region:
/// identity hash, timer period, tick budget, infinite-run flag.
pub const SYSTEM_REGION_WORDS: u64 = 4;

/// Recording channels are reported through a 32-bit flags word.
pub const MAX_RECORDING_CHANNELS: u32 = 32;

/// Default base address of the shared SDRAM window.
pub const DEFAULT_SDRAM_BASE: u64 = 0x6000_0000;

/// Default size of the shared SDRAM window.
pub const DEFAULT_SDRAM_SIZE: usize = 1024 * 1024;

/// Default depth of each per-source pending event queue in the dispatcher.
pub const DEFAULT_MAX_PENDING_EVENTS: usize = 256;
