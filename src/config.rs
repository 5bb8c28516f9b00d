//! Runtime configuration.
//!
//! Loaded from TOML. Every section and field has a default, so an empty
//! file describes the standard relay demo. Addresses and sizes are given as
//! hex strings, the way board support files write them.

use crate::common::constants::{DEFAULT_MAX_PENDING_EVENTS, DEFAULT_SDRAM_BASE, DEFAULT_SDRAM_SIZE};
use crate::fabric::transport::Routing;
use crate::runtime::app::{RECORD_PACKETS, RECORD_TICKS};
use crate::runtime::dispatch::DispatchPriorities;
use crate::runtime::retry::RetryPolicy;
use crate::sim::loader::RelayImage;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_BLOB_OFFSET: u64 = 0x0;
const DEFAULT_TIMER_PERIOD_US: u32 = 1000;
const DEFAULT_TICKS: u32 = 10;
const DEFAULT_PACKETS: u32 = 130;
const DEFAULT_PACKET_SPACING_US: u64 = 50;
const DEFAULT_BATCH_CAPACITY: u32 = 64;
const DEFAULT_INBOUND_CAPACITY: u32 = 256;
const DEFAULT_CHANNEL_BYTES: u32 = 4096;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("could not read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub memory: MemoryConfig,
    pub transport: TransportConfig,
    pub retry: RetryPolicy,
    pub priorities: DispatchPriorities,
    pub run: RunConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub trace_events: bool,

    #[serde(default = "default_max_pending")]
    pub max_pending_events: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            trace_events: false,
            max_pending_events: DEFAULT_MAX_PENDING_EVENTS,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_sdram_base")]
    pub sdram_base: String,

    #[serde(default = "default_sdram_size")]
    pub sdram_size: String,

    /// Offset of the configuration blob from the start of SDRAM.
    #[serde(default = "default_blob_offset")]
    pub blob_offset: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sdram_base: default_sdram_base(),
            sdram_size: default_sdram_size(),
            blob_offset: default_blob_offset(),
        }
    }
}

impl MemoryConfig {
    pub fn sdram_base_val(&self) -> u64 {
        parse_hex(&self.sdram_base, DEFAULT_SDRAM_BASE)
    }

    pub fn sdram_size_val(&self) -> usize {
        parse_hex(&self.sdram_size, DEFAULT_SDRAM_SIZE as u64) as usize
    }

    pub fn blob_offset_val(&self) -> u64 {
        parse_hex(&self.blob_offset, DEFAULT_BLOB_OFFSET)
    }

    /// Absolute address of the configuration blob.
    pub fn blob_base(&self) -> u64 {
        self.sdram_base_val() + self.blob_offset_val()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub routing: Routing,

    /// Refusals the loopback transport answers each message with before
    /// accepting it.
    #[serde(default)]
    pub busy_per_send: u32,
}

/// Parameters of the demo blob and the simulated host.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_timer_period")]
    pub timer_period_us: u32,

    #[serde(default = "default_ticks")]
    pub ticks: u32,

    #[serde(default)]
    pub infinite: bool,

    /// Run segments the host drives: pause, read, resume.
    #[serde(default = "default_segments")]
    pub segments: u32,

    #[serde(default = "default_packets")]
    pub packets: u32,

    #[serde(default = "default_packet_spacing")]
    pub packet_spacing_us: u64,

    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: u32,

    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: u32,

    #[serde(default = "default_true")]
    pub record_packets: bool,

    #[serde(default = "default_true")]
    pub record_ticks: bool,

    #[serde(default = "default_channel_bytes")]
    pub packet_channel_bytes: u32,

    #[serde(default = "default_channel_bytes")]
    pub tick_channel_bytes: u32,

    #[serde(default = "default_true")]
    pub provenance: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timer_period_us: DEFAULT_TIMER_PERIOD_US,
            ticks: DEFAULT_TICKS,
            infinite: false,
            segments: default_segments(),
            packets: DEFAULT_PACKETS,
            packet_spacing_us: DEFAULT_PACKET_SPACING_US,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            record_packets: true,
            record_ticks: true,
            packet_channel_bytes: DEFAULT_CHANNEL_BYTES,
            tick_channel_bytes: DEFAULT_CHANNEL_BYTES,
            provenance: true,
        }
    }
}

impl RunConfig {
    pub fn record_flags(&self) -> u32 {
        let mut flags = 0;
        if self.record_packets {
            flags |= RECORD_PACKETS;
        }
        if self.record_ticks {
            flags |= RECORD_TICKS;
        }
        flags
    }

    /// Describes the blob for this run.
    pub fn image(&self) -> RelayImage {
        let flags = self.record_flags();
        RelayImage {
            timer_period_us: self.timer_period_us,
            ticks: self.ticks,
            infinite: u32::from(self.infinite),
            batch_capacity: self.batch_capacity,
            inbound_capacity: self.inbound_capacity,
            record_flags: flags,
            channel_capacities: if flags == 0 {
                Vec::new()
            } else {
                vec![self.packet_channel_bytes, self.tick_channel_bytes]
            },
            provenance: self.provenance,
            ..RelayImage::default()
        }
    }
}

fn parse_hex(s: &str, default: u64) -> u64 {
    let s = s.trim_start_matches("0x");
    u64::from_str_radix(s, 16).unwrap_or(default)
}

fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING_EVENTS
}

fn default_sdram_base() -> String {
    format!("{:#x}", DEFAULT_SDRAM_BASE)
}

fn default_sdram_size() -> String {
    format!("{:#x}", DEFAULT_SDRAM_SIZE)
}

fn default_blob_offset() -> String {
    format!("{:#x}", DEFAULT_BLOB_OFFSET)
}

fn default_timer_period() -> u32 {
    DEFAULT_TIMER_PERIOD_US
}

fn default_ticks() -> u32 {
    DEFAULT_TICKS
}

fn default_segments() -> u32 {
    1
}

fn default_packets() -> u32 {
    DEFAULT_PACKETS
}

fn default_packet_spacing() -> u64 {
    DEFAULT_PACKET_SPACING_US
}

fn default_batch_capacity() -> u32 {
    DEFAULT_BATCH_CAPACITY
}

fn default_inbound_capacity() -> u32 {
    DEFAULT_INBOUND_CAPACITY
}

fn default_channel_bytes() -> u32 {
    DEFAULT_CHANNEL_BYTES
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.memory.sdram_base_val(), DEFAULT_SDRAM_BASE);
        assert_eq!(config.run.ticks, DEFAULT_TICKS);
        assert_eq!(config.priorities, DispatchPriorities::default());
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn sections_override_fields() {
        let config: Config = toml::from_str(
            r#"
            [memory]
            sdram_base = "0x70000000"
            blob_offset = "0x100"

            [retry]
            delay_us = 5
            max_attempts = 3

            [priorities]
            packet = -2

            [run]
            ticks = 4
            record_ticks = false
            "#,
        )
        .unwrap();
        assert_eq!(config.memory.blob_base(), 0x7000_0100);
        assert_eq!(config.retry.max_attempts, Some(3));
        assert_eq!(config.retry.delay_us, 5);
        assert_eq!(config.priorities.packet.0, -2);
        assert_eq!(config.run.record_flags(), RECORD_PACKETS);
    }

    #[test]
    fn shipped_config_retries_with_fixed_delay() {
        let config: Config = toml::from_str(include_str!("../configs/default.toml")).unwrap();
        assert_eq!(config.retry.multiplier, 1);
        assert_eq!(config.retry.max_delay_us, config.retry.delay_us);
        assert_eq!(config.retry.max_attempts, None);
    }

    #[test]
    fn bad_hex_falls_back_to_default() {
        let memory = MemoryConfig {
            sdram_base: "zz".to_string(),
            ..MemoryConfig::default()
        };
        assert_eq!(memory.sdram_base_val(), DEFAULT_SDRAM_BASE);
    }
}
