//! Region Descriptor Reader.
//!
//! Parses the fixed-layout configuration blob written by the host toolchain:
//!
//! ```text
//! word 0       magic
//! word 1       version
//! word 2       region count N
//! word 3+2i    region i offset (relative to the blob base)
//! word 4+2i    region i length in bytes (0 = region absent)
//! ```
//!
//! The reader only performs fixed-offset reads and never writes.

use crate::common::constants::{
    BLOB_MAGIC, BLOB_VERSION, BLOB_VERSION_MAJOR_MASK, HEADER_WORDS, MAX_REGIONS,
    TABLE_ENTRY_WORDS, WORD_BYTES,
};
use crate::common::error::{ConfigError, HeaderError};
use crate::fabric::memory::Sdram;
use tracing::debug;

/// Location of one declared region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionDescriptor {
    /// Position in the application's declaration order.
    pub index: u32,
    /// Absolute address of the first byte.
    pub base_address: u64,
    /// Length in bytes; zero for an absent region.
    pub length: u32,
}

impl RegionDescriptor {
    pub fn is_present(&self) -> bool {
        self.length > 0
    }

    /// Number of whole words in the region.
    pub fn word_count(&self) -> u64 {
        u64::from(self.length) / WORD_BYTES
    }

    /// Absolute address of word `n`.
    pub fn word_addr(&self, n: u64) -> u64 {
        self.base_address + n * WORD_BYTES
    }

    /// Fails with `RegionTooShort` unless the region holds `needed` bytes.
    pub fn require_len(&self, needed: u32) -> Result<(), ConfigError> {
        if self.length < needed {
            return Err(ConfigError::RegionTooShort {
                index: self.index,
                length: self.length,
                needed,
            });
        }
        Ok(())
    }

    /// Reads word `n` of the region.
    pub fn read_word(&self, memory: &Sdram, n: u64) -> Result<u32, ConfigError> {
        let needed = u32::try_from((n + 1) * WORD_BYTES).unwrap_or(u32::MAX);
        self.require_len(needed)?;
        memory
            .read_u32(self.word_addr(n))
            .map_err(|_| ConfigError::RegionTooShort {
                index: self.index,
                length: self.length,
                needed,
            })
    }
}

/// Validates the blob header at `base_address` and returns every declared
/// region in declaration order.
pub fn read(memory: &Sdram, base_address: u64) -> Result<Vec<RegionDescriptor>, HeaderError> {
    let word = |n: u64| {
        let addr = base_address + n * WORD_BYTES;
        memory
            .read_u32(addr)
            .map_err(|_| HeaderError::Truncated { addr })
    };

    let magic = word(0)?;
    if magic != BLOB_MAGIC {
        return Err(HeaderError::BadMagic {
            found: magic,
            expected: BLOB_MAGIC,
        });
    }

    let version = word(1)?;
    if version & BLOB_VERSION_MAJOR_MASK != BLOB_VERSION & BLOB_VERSION_MAJOR_MASK {
        return Err(HeaderError::UnsupportedVersion { found: version });
    }

    let count = word(2)?;
    if count > MAX_REGIONS {
        return Err(HeaderError::TooManyRegions {
            count,
            max: MAX_REGIONS,
        });
    }

    let mut regions = Vec::with_capacity(count as usize);
    for index in 0..count {
        let entry = HEADER_WORDS + u64::from(index) * TABLE_ENTRY_WORDS;
        let offset = word(entry)?;
        let length = word(entry + 1)?;
        let region_base = base_address + u64::from(offset);

        if length > 0 && !memory.contains(region_base, u64::from(length)) {
            return Err(HeaderError::RegionOutOfBounds {
                index,
                offset,
                length,
            });
        }

        debug!(index, base = region_base, length, "region");
        regions.push(RegionDescriptor {
            index,
            base_address: region_base,
            length,
        });
    }

    Ok(regions)
}

/// Regions of one blob, indexed by declaration order.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: Vec<RegionDescriptor>,
}

impl RegionTable {
    /// Reads the blob at `base_address` into a table.
    pub fn load(memory: &Sdram, base_address: u64) -> Result<Self, HeaderError> {
        read(memory, base_address).map(|regions| Self { regions })
    }

    /// Returns region `index` if it was declared and is present.
    pub fn get(&self, index: u32) -> Option<&RegionDescriptor> {
        self.regions
            .get(index as usize)
            .filter(|r| r.is_present())
    }

    /// Returns region `index`, failing if it is absent.
    pub fn require(&self, index: u32) -> Result<&RegionDescriptor, ConfigError> {
        self.get(index).ok_or(ConfigError::MissingRegion(index))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionDescriptor> {
        self.regions.iter()
    }
}
