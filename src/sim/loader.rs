//! Blob Loader and Writer.
//!
//! Reads configuration blobs produced by the host toolchain, and writes the
//! minimal blobs the demo and the tests need. The writer knows the header
//! and region table layout only; it is not a host toolchain.

use crate::common::constants::{BLOB_MAGIC, BLOB_VERSION, HEADER_WORDS, TABLE_ENTRY_WORDS, WORD_BYTES};
use crate::runtime::app::RELAY_APP_IDENTITY;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read image '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("image '{path}' is empty")]
    Empty { path: PathBuf },
}

/// Loads a blob file from disk.
pub fn load_image(path: impl AsRef<Path>) -> Result<Vec<u8>, LoadError> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if data.is_empty() {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    info!(path = %path.display(), bytes = data.len(), "image loaded");
    Ok(data)
}

/// Serializes words as little-endian bytes.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Writes a blob: header, region table, then each region's contents.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    magic: u32,
    version: u32,
    regions: Vec<Option<Vec<u8>>>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            magic: BLOB_MAGIC,
            version: BLOB_VERSION,
            regions: Vec::new(),
        }
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the magic number.
    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    /// Overrides the version word.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Declares the next region with the given words.
    pub fn words(mut self, words: &[u32]) -> Self {
        self.regions.push(Some(words_to_bytes(words)));
        self
    }

    /// Declares the next region with raw bytes, padded to a word.
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.regions.push(Some(bytes.to_vec()));
        self
    }

    /// Declares the next region as absent.
    pub fn absent(mut self) -> Self {
        self.regions.push(None);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let table_words = HEADER_WORDS + TABLE_ENTRY_WORDS * self.regions.len() as u64;
        let mut header = vec![self.magic, self.version, self.regions.len() as u32];
        let mut body = Vec::new();
        let mut offset = table_words * WORD_BYTES;

        for region in &self.regions {
            match region {
                Some(bytes) => {
                    header.push(offset as u32);
                    header.push(bytes.len() as u32);
                    body.extend_from_slice(bytes);
                    let padded = (bytes.len() as u64).div_ceil(WORD_BYTES) * WORD_BYTES;
                    body.resize(body.len() + (padded as usize - bytes.len()), 0);
                    offset += padded;
                }
                None => {
                    header.push(0);
                    header.push(0);
                }
            }
        }

        let mut image = words_to_bytes(&header);
        image.extend_from_slice(&body);
        image
    }
}

/// Description of a packet relay blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayImage {
    pub identity: u32,
    pub timer_period_us: u32,
    pub ticks: u32,
    pub infinite: u32,
    pub batch_capacity: u32,
    pub inbound_capacity: u32,
    pub record_flags: u32,
    /// Capacity in bytes of each recording channel; empty for no region.
    pub channel_capacities: Vec<u32>,
    pub provenance: bool,
}

impl Default for RelayImage {
    fn default() -> Self {
        Self {
            identity: RELAY_APP_IDENTITY,
            timer_period_us: 1000,
            ticks: 10,
            infinite: 0,
            batch_capacity: 64,
            inbound_capacity: 256,
            record_flags: 0,
            channel_capacities: Vec::new(),
            provenance: true,
        }
    }
}

impl RelayImage {
    /// Size in bytes of the recording region this image declares.
    pub fn recording_region_len(&self) -> usize {
        let header = (1 + self.channel_capacities.len()) * WORD_BYTES as usize;
        let blocks: usize = self
            .channel_capacities
            .iter()
            .map(|&c| WORD_BYTES as usize + (c as usize).div_ceil(WORD_BYTES as usize) * WORD_BYTES as usize)
            .sum();
        header + blocks
    }

    /// Builder with the system, params, recording and provenance regions
    /// declared in that order.
    pub fn builder(&self) -> ImageBuilder {
        let mut builder = ImageBuilder::new()
            .words(&[self.identity, self.timer_period_us, self.ticks, self.infinite])
            .words(&[self.batch_capacity, self.inbound_capacity, self.record_flags]);

        builder = if self.channel_capacities.is_empty() {
            builder.absent()
        } else {
            let mut region = vec![self.channel_capacities.len() as u32];
            region.extend_from_slice(&self.channel_capacities);
            let mut bytes = words_to_bytes(&region);
            bytes.resize(self.recording_region_len(), 0);
            builder.bytes(&bytes)
        };

        if self.provenance {
            builder.words(&[0; crate::stats::PROVENANCE_WORDS])
        } else {
            builder.absent()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        self.builder().build()
    }
}
