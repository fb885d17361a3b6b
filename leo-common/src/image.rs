// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Random-access flash content: the candidate `.mem` file or live flash.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{FormatError, Result};
use crate::protocol::SPI_FLASH_SIZE;

/// Byte-addressable view of a flash address space.
///
/// Words are read big-endian, the byte order used by the container format.
pub trait FlashImage {
    /// Size of the address space in bytes.
    fn size(&self) -> u32;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    fn read_word(&mut self, addr: u32) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read(addr, &mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn read_vec(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }
}

impl<I: FlashImage + ?Sized> FlashImage for &mut I {
    fn size(&self) -> u32 {
        (**self).size()
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, buf)
    }
}

/// Reject accesses that leave `[0, size)`.
pub fn check_range(addr: u32, len: usize, size: u32) -> core::result::Result<(), FormatError> {
    let end = u64::from(addr) + len as u64;
    if end > u64::from(size) {
        return Err(FormatError::OutOfBounds { addr, len, size });
    }
    Ok(())
}

/// Candidate firmware decoded into a flat, erased (0xFF) address space.
#[derive(Clone, PartialEq, Eq)]
pub struct MemImage {
    data: Vec<u8>,
    min: u32,
    max: u32,
}

impl core::fmt::Debug for MemImage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemImage")
            .field("size", &self.data.len())
            .field("range", &self.range())
            .finish()
    }
}

impl Default for MemImage {
    fn default() -> Self {
        Self::blank(SPI_FLASH_SIZE)
    }
}

impl MemImage {
    /// Erased image of `size` bytes with nothing written yet.
    pub fn blank(size: u32) -> Self {
        Self {
            data: vec![0xff; size as usize],
            min: u32::MAX,
            max: 0,
        }
    }

    /// Decode the `@<addr> <byte> <byte> ...` line format.
    ///
    /// Blank lines are ignored. Every other line must start with an address
    /// record; the bytes that follow are stored at consecutive addresses.
    pub fn parse(text: &str) -> core::result::Result<Self, FormatError> {
        let mut image = Self::default();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let mut tokens = line.split_whitespace();
            let Some(first) = tokens.next() else {
                continue;
            };
            let bad = |reason| FormatError::BadMemLine {
                line: line_no,
                reason,
            };
            let hex = first.strip_prefix('@').ok_or(bad("missing @address"))?;
            let mut addr = u32::from_str_radix(hex, 16).map_err(|_| bad("bad address"))?;
            let start = addr;
            let mut bytes = Vec::new();
            for token in tokens {
                let value = u8::from_str_radix(token, 16).map_err(|_| bad("bad byte value"))?;
                bytes.push(value);
                addr = addr.checked_add(1).ok_or(bad("address overflow"))?;
            }
            if check_range(start, bytes.len(), image.size()).is_err() {
                return Err(bad("address outside flash"));
            }
            image.store(start, &bytes);
            // An address record without data still counts as touched.
            image.min = image.min.min(start);
            image.max = image.max.max(addr);
        }
        Ok(image)
    }

    /// Copy `bytes` into the image at `addr`.
    pub fn write(&mut self, addr: u32, bytes: &[u8]) -> core::result::Result<(), FormatError> {
        check_range(addr, bytes.len(), self.size())?;
        self.store(addr, bytes);
        if !bytes.is_empty() {
            self.min = self.min.min(addr);
            self.max = self.max.max(addr + bytes.len() as u32);
        }
        Ok(())
    }

    fn store(&mut self, addr: u32, bytes: &[u8]) {
        let at = addr as usize;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Lowest written address and the address one past the highest.
    pub fn range(&self) -> Option<(u32, u32)> {
        (self.min <= self.max).then_some((self.min, self.max))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn slice(&self, addr: u32, len: usize) -> core::result::Result<&[u8], FormatError> {
        check_range(addr, len, self.size())?;
        Ok(&self.data[addr as usize..addr as usize + len])
    }
}

impl FlashImage for MemImage {
    fn size(&self) -> u32 {
        self.data.len() as u32
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(self.slice(addr, buf.len())?);
        Ok(())
    }
}

impl FlashImage for &MemImage {
    fn size(&self) -> u32 {
        self.data.len() as u32
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(self.slice(addr, buf.len())?);
        Ok(())
    }
}
