//! Provenance region writer.
//!
//! Copies a stats snapshot into a host-visible region so the host can tell
//! what a core did during its last run segment.

use crate::common::constants::WORD_BYTES;
use crate::common::error::ConfigError;
use crate::fabric::memory::{AccessFault, Sdram};
use crate::runtime::regions::RegionDescriptor;
use crate::stats::{RuntimeStats, PROVENANCE_WORDS};

#[derive(Debug, Clone, Copy)]
pub struct ProvenanceRegion {
    region: RegionDescriptor,
}

impl ProvenanceRegion {
    pub fn new(region: &RegionDescriptor) -> Result<Self, ConfigError> {
        region.require_len((PROVENANCE_WORDS as u64 * WORD_BYTES) as u32)?;
        Ok(Self { region: *region })
    }

    pub fn region(&self) -> &RegionDescriptor {
        &self.region
    }

    pub fn write(&self, memory: &mut Sdram, stats: &RuntimeStats) -> Result<(), AccessFault> {
        for (i, value) in stats.provenance_words().iter().enumerate() {
            memory.write_u32(self.region.word_addr(i as u64), *value)?;
        }
        Ok(())
    }
}
