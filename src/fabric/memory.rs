//! Shared SDRAM Window.
//!
//! The configuration blob is loaded into this window by the host before the
//! core boots, and recording/provenance regions inside it are read back by
//! the host after a pause. Addresses are absolute; the window covers
//! `[base, base + size)`.

use thiserror::Error;

/// An access touched bytes outside the mapped window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("access at {addr:#010x} (+{len} bytes) outside SDRAM")]
pub struct AccessFault {
    pub addr: u64,
    pub len: usize,
}

/// Byte-addressable SDRAM window.
pub struct Sdram {
    base: u64,
    data: Vec<u8>,
}

impl Sdram {
    /// Creates a zero-filled window of `size` bytes at `base`.
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    /// Creates a window of `size` bytes at `base` with `image` copied to its start.
    ///
    /// The window is grown to fit the image if `size` is too small.
    pub fn with_image(base: u64, size: usize, image: &[u8]) -> Self {
        let mut data = vec![0; size.max(image.len())];
        data[..image.len()].copy_from_slice(image);
        Self { base, data }
    }

    /// Returns the `(base, size)` of the window.
    pub fn address_range(&self) -> (u64, u64) {
        (self.base, self.data.len() as u64)
    }

    /// Returns `true` if `[addr, addr + len)` lies inside the window.
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        let (base, size) = self.address_range();
        addr >= base
            && addr
                .checked_add(len)
                .is_some_and(|end| end <= base + size)
    }

    fn offset(&self, addr: u64, len: usize) -> Result<usize, AccessFault> {
        if self.contains(addr, len as u64) {
            Ok((addr - self.base) as usize)
        } else {
            Err(AccessFault { addr, len })
        }
    }

    /// Reads a little-endian word.
    pub fn read_u32(&self, addr: u64) -> Result<u32, AccessFault> {
        let off = self.offset(addr, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.data[off..off + 4]);
        Ok(u32::from_le_bytes(word))
    }

    /// Writes a little-endian word.
    pub fn write_u32(&mut self, addr: u64, val: u32) -> Result<(), AccessFault> {
        let off = self.offset(addr, 4)?;
        self.data[off..off + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// Borrows `len` bytes starting at `addr`.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8], AccessFault> {
        let off = self.offset(addr, len)?;
        Ok(&self.data[off..off + len])
    }

    /// Copies `bytes` into the window starting at `addr`.
    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), AccessFault> {
        let off = self.offset(addr, bytes.len())?;
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
