//! Recording Sink.
//!
//! Append-only recording channels inside a host-visible region:
//!
//! ```text
//! word 0            channel count N
//! word 1..=N        capacity of channel i in bytes
//! then per channel  [visible length word][capacity bytes, padded to a word]
//! ```
//!
//! Records are written straight into SDRAM at the channel cursor, but the
//! host only trusts the visible length word, which `finalize` publishes
//! once per pause or exit.

use crate::common::constants::{MAX_RECORDING_CHANNELS, WORD_BYTES};
use crate::common::error::{RecordError, RecordingInitError};
use crate::fabric::memory::Sdram;
use crate::runtime::regions::RegionDescriptor;
use tracing::{debug, warn};

/// One append-only channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordingChannel {
    /// Address of the channel's visible length word.
    pub length_addr: u64,
    /// Address of the first data byte.
    pub region_base: u64,
    /// Data capacity in bytes.
    pub capacity: u32,
    /// Bytes written in the current run segment.
    pub cursor: u32,
}

impl RecordingChannel {
    pub fn remaining(&self) -> u32 {
        self.capacity - self.cursor
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordingCounters {
    pub records: u64,
    pub bytes: u64,
    pub dropped: u64,
}

/// Recording channels of one core.
#[derive(Debug, Default)]
pub struct RecordingSink {
    channels: Vec<RecordingChannel>,
    flags: u32,
    finalized: bool,
    counters: RecordingCounters,
}

fn padded(len: u32) -> u64 {
    u64::from(len).div_ceil(WORD_BYTES) * WORD_BYTES
}

impl RecordingSink {
    /// Parses the recording region and lays out its channels.
    ///
    /// Bit `i` of the returned sink's `flags()` is set iff channel `i` has a
    /// non-zero capacity.
    pub fn initialize(
        region: Option<&RegionDescriptor>,
        memory: &Sdram,
    ) -> Result<Self, RecordingInitError> {
        let region = region
            .filter(|r| r.is_present())
            .ok_or(RecordingInitError::MissingRegion)?;

        let truncated = |needed: u64| RecordingInitError::Truncated {
            length: region.length,
            needed: u32::try_from(needed).unwrap_or(u32::MAX),
        };
        let word = |n: u64| {
            memory
                .read_u32(region.word_addr(n))
                .map_err(|_| truncated((n + 1) * WORD_BYTES))
        };

        if region.word_count() < 1 {
            return Err(truncated(WORD_BYTES));
        }
        let count = word(0)?;
        if count > MAX_RECORDING_CHANNELS {
            return Err(RecordingInitError::TooManyChannels {
                count,
                max: MAX_RECORDING_CHANNELS,
            });
        }

        let header = (1 + u64::from(count)) * WORD_BYTES;
        if u64::from(region.length) < header {
            return Err(truncated(header));
        }

        let mut channels = Vec::with_capacity(count as usize);
        let mut flags = 0u32;
        let mut next = region.base_address + header;
        for i in 0..count {
            let capacity = word(1 + u64::from(i))?;
            channels.push(RecordingChannel {
                length_addr: next,
                region_base: next + WORD_BYTES,
                capacity,
                cursor: 0,
            });
            if capacity > 0 {
                flags |= 1 << i;
            }
            next += WORD_BYTES + padded(capacity);
        }

        let needed = next - region.base_address;
        if needed > u64::from(region.length) {
            return Err(truncated(needed));
        }

        debug!(channels = count, flags, "recording initialized");
        Ok(Self {
            channels,
            flags,
            finalized: false,
            counters: RecordingCounters::default(),
        })
    }

    /// A sink with no channels, for applications that do not record.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Bit mask of channels with non-zero capacity.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn channel(&self, channel: u8) -> Option<&RecordingChannel> {
        self.channels.get(channel as usize)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn counters(&self) -> RecordingCounters {
        self.counters
    }

    /// Appends `bytes` to `channel`.
    ///
    /// A record that does not fit in the remaining capacity is dropped whole
    /// and counted; nothing is written.
    pub fn record(
        &mut self,
        memory: &mut Sdram,
        channel: u8,
        bytes: &[u8],
    ) -> Result<(), RecordError> {
        if self.finalized {
            self.counters.dropped += 1;
            return Err(RecordError::Sealed);
        }
        let Some(ch) = self.channels.get_mut(channel as usize) else {
            self.counters.dropped += 1;
            return Err(RecordError::UnknownChannel(channel));
        };

        let remaining = ch.remaining();
        if bytes.len() > remaining as usize {
            self.counters.dropped += 1;
            warn!(channel, requested = bytes.len(), remaining, "recording overflow, record dropped");
            return Err(RecordError::Overflow {
                channel,
                requested: bytes.len(),
                remaining,
            });
        }

        // In-bounds by construction: the channel layout was checked against
        // the region, and the region against SDRAM.
        if memory
            .write_bytes(ch.region_base + u64::from(ch.cursor), bytes)
            .is_err()
        {
            self.counters.dropped += 1;
            return Err(RecordError::Overflow {
                channel,
                requested: bytes.len(),
                remaining,
            });
        }
        ch.cursor += bytes.len() as u32;
        self.counters.records += 1;
        self.counters.bytes += bytes.len() as u64;
        Ok(())
    }

    /// Publishes every channel's length so the host can extract it.
    ///
    /// # Returns
    ///
    /// `true` on the first call of a run segment; later calls change nothing.
    pub fn finalize(&mut self, memory: &mut Sdram) -> bool {
        if self.finalized {
            return false;
        }
        for ch in &self.channels {
            if memory.write_u32(ch.length_addr, ch.cursor).is_err() {
                warn!(addr = ch.length_addr, "recording length word unmapped");
            }
        }
        self.finalized = true;
        debug!(
            records = self.counters.records,
            dropped = self.counters.dropped,
            "recording finalized"
        );
        true
    }

    /// Re-arms finalization without rewinding, so later records follow the
    /// bytes already published.
    pub fn reopen(&mut self) {
        self.finalized = false;
    }

    /// Rewinds every channel for a new run segment after the host has read
    /// the previous one.
    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.cursor = 0;
        }
        self.finalized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    const BASE: u64 = 0x1000;

    fn sink_with(capacities: &[u32]) -> (RecordingSink, Sdram) {
        let mut memory = Sdram::new(BASE, 1024);
        memory.write_u32(BASE, capacities.len() as u32).unwrap();
        for (i, cap) in capacities.iter().enumerate() {
            memory.write_u32(BASE + 4 * (i as u64 + 1), *cap).unwrap();
        }
        let region = RegionDescriptor {
            index: 2,
            base_address: BASE,
            length: 512,
        };
        let sink = RecordingSink::initialize(Some(&region), &memory).unwrap();
        (sink, memory)
    }

    #[traced_test]
    #[test]
    fn overflow_drops_whole_record() {
        let (mut sink, mut memory) = sink_with(&[6]);
        sink.record(&mut memory, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            sink.record(&mut memory, 0, &[5, 6, 7]),
            Err(RecordError::Overflow {
                channel: 0,
                requested: 3,
                remaining: 2,
            })
        );
        assert!(logs_contain("recording overflow, record dropped"));

        let ch = *sink.channel(0).unwrap();
        assert_eq!(ch.cursor, 4);
        assert_eq!(memory.read_bytes(ch.region_base + 4, 2).unwrap(), &[0, 0]);
        assert_eq!(sink.counters().dropped, 1);
    }

    #[test]
    fn zero_capacity_channel_clears_flag() {
        let (sink, _) = sink_with(&[8, 0, 4]);
        assert_eq!(sink.flags(), 0b101);
        let second = sink.channel(1).unwrap();
        let third = sink.channel(2).unwrap();
        assert_eq!(third.length_addr, second.length_addr + WORD_BYTES);
    }

    #[test]
    fn reopen_appends_after_published_bytes() {
        let (mut sink, mut memory) = sink_with(&[16]);
        sink.record(&mut memory, 0, &[1, 2, 3, 4]).unwrap();
        assert!(sink.finalize(&mut memory));
        assert_eq!(sink.record(&mut memory, 0, &[9]), Err(RecordError::Sealed));

        sink.reopen();
        sink.record(&mut memory, 0, &[5, 6, 7, 8]).unwrap();
        assert!(sink.finalize(&mut memory));

        let ch = *sink.channel(0).unwrap();
        assert_eq!(memory.read_u32(ch.length_addr).unwrap(), 8);
        assert_eq!(
            memory.read_bytes(ch.region_base, 8).unwrap(),
            &[1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn too_many_channels() {
        let mut memory = Sdram::new(BASE, 64);
        memory.write_u32(BASE, 33).unwrap();
        let region = RegionDescriptor {
            index: 2,
            base_address: BASE,
            length: 64,
        };
        assert_eq!(
            RecordingSink::initialize(Some(&region), &memory).unwrap_err(),
            RecordingInitError::TooManyChannels { count: 33, max: 32 }
        );
    }
}
