// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Block container codec.
//!
//! Flash holds a chain of self-describing blocks:
//!
//! ```text
//! +0x00  5AA55AA5 5AA55AA5      header pattern
//! +0x08  subtype<<16 | type
//! +0x0c  version
//! +0x10  length, length copy    payload bytes
//! +0x18  address
//! +0x1c  config data [2]
//! +0x24  payload ...
//!        crc, AA55AA55 AA55AA55 trailer
//! ```
//!
//! Nothing is cached: every lookup rescans, since flash may have been
//! rewritten between two calls.

use alloc::vec::Vec;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::crc::block_crc;
use crate::error::{Error, FormatError, Result};
use crate::image::FlashImage;
use crate::protocol::{
    BlockType, BLOCK_CRC_START, BLOCK_FOOTER_WORD, BLOCK_HEADER_SIZE, BLOCK_HEADER_WORD,
    BLOCK_TRAILER_SIZE, FOOTER_SCAN_LIMIT_WORDS, LEGACY_PERSISTENT_DATA_ADDR,
};

/// Bounds of the forward scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLimits {
    /// Words examined past `start + length` when looking for the footer.
    pub footer_scan_words: u32,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            footer_scan_words: FOOTER_SCAN_LIMIT_WORDS,
        }
    }
}

/// Decoded block header and trailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The header pattern. It is two words; the type word follows directly
    /// at +0x08 and is decoded into `block_type` and `subtype`.
    pub header: [u32; 2],
    pub block_type: BlockType,
    pub subtype: u16,
    pub version: u32,
    pub length: u32,
    pub length_copy: u32,
    pub address: u32,
    pub config_data: [u32; 2],
    pub crc: u32,
    pub trailer: [u32; 2],
    pub start_addr: u32,
    /// One past the last footer word.
    pub end_addr: u32,
}

impl Block {
    pub fn size(&self) -> u32 {
        self.end_addr - self.start_addr
    }

    pub fn len_words(&self) -> u32 {
        self.size() / 4
    }

    pub fn payload_addr(&self) -> u32 {
        self.start_addr + BLOCK_HEADER_SIZE
    }
}

/// Fields of a block to be serialized with [`NewBlock::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock<'a> {
    pub block_type: BlockType,
    pub subtype: u16,
    pub version: u32,
    pub address: u32,
    pub config_data: [u32; 2],
    pub payload: &'a [u8],
}

impl<'a> NewBlock<'a> {
    pub fn new(block_type: BlockType, payload: &'a [u8]) -> Self {
        Self {
            block_type,
            subtype: 0,
            version: 0,
            address: 0,
            config_data: [0; 2],
            payload,
        }
    }

    /// Serialize to the on-flash layout. The payload is padded to a word
    /// boundary with 0xFF and the CRC is computed over the result.
    pub fn encode(&self) -> Vec<u8> {
        let length = self.payload.len().next_multiple_of(4) as u32;
        let total = (BLOCK_HEADER_SIZE + length + BLOCK_TRAILER_SIZE) as usize;
        let mut out = Vec::with_capacity(total);

        let header = [
            BLOCK_HEADER_WORD,
            BLOCK_HEADER_WORD,
            (u32::from(self.subtype) << 16) | u32::from(self.block_type.as_u8()),
            self.version,
            length,
            length,
            self.address,
            self.config_data[0],
            self.config_data[1],
        ];
        for word in header {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.extend_from_slice(self.payload);
        out.resize((BLOCK_HEADER_SIZE + length) as usize, 0xff);

        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&BLOCK_FOOTER_WORD.to_be_bytes());
        out.extend_from_slice(&BLOCK_FOOTER_WORD.to_be_bytes());

        let crc = block_crc(&out);
        let at = total - BLOCK_TRAILER_SIZE as usize;
        out[at..at + 4].copy_from_slice(&crc.to_be_bytes());
        out
    }
}

fn no_more_blocks(err: &Error) -> bool {
    matches!(err, Error::Format(FormatError::NoMoreBlocks { .. }))
}

/// Block scanner over live flash or an in-memory image.
pub struct BlockCodec<I> {
    image: I,
    limits: ScanLimits,
}

impl<I: FlashImage> BlockCodec<I> {
    pub fn new(image: I) -> Self {
        Self::with_limits(image, ScanLimits::default())
    }

    pub fn with_limits(image: I, limits: ScanLimits) -> Self {
        Self { image, limits }
    }

    pub fn image(&mut self) -> &mut I {
        &mut self.image
    }

    pub fn into_inner(self) -> I {
        self.image
    }

    /// True when `addr` starts with the two header words.
    pub fn has_header(&mut self, addr: u32) -> Result<bool> {
        Ok(self.image.read_word(addr)? == BLOCK_HEADER_WORD
            && self.image.read_word(addr + 4)? == BLOCK_HEADER_WORD)
    }

    /// Payload length of the block at `addr`, checked against its copy.
    pub fn get_block_size(&mut self, addr: u32) -> Result<u32> {
        let found0 = self.image.read_word(addr)?;
        let found1 = self.image.read_word(addr + 4)?;
        if found0 != BLOCK_HEADER_WORD || found1 != BLOCK_HEADER_WORD {
            return Err(FormatError::BadHeader {
                addr,
                found0,
                found1,
            }
            .into());
        }

        let length = self.image.read_word(addr + 16)?;
        let length_copy = self.image.read_word(addr + 20)?;
        if length != length_copy {
            return Err(FormatError::LengthMismatch {
                addr,
                length,
                length_copy,
            }
            .into());
        }
        Ok(length)
    }

    /// Address one past the footer of the block at `addr`.
    ///
    /// The scan fails when it reaches the header pattern of another block
    /// before a footer pair, so a block missing its footer never borrows
    /// the footer of its successor.
    pub fn find_block_end(&mut self, addr: u32) -> Result<u32> {
        let length = self.get_block_size(addr)?;
        let scanned = self.limits.footer_scan_words;
        let missing = FormatError::MissingFooter { addr, scanned };

        let Some(mut cursor) = addr
            .checked_add(length)
            .map(|end| end.max(addr.saturating_add(BLOCK_HEADER_SIZE)))
        else {
            return Err(missing.into());
        };
        let size = self.image.size();
        let mut previous = 0;
        for _ in 0..scanned {
            if cursor.saturating_add(4) > size {
                break;
            }
            let word = self.image.read_word(cursor)?;
            if previous == BLOCK_FOOTER_WORD && word == BLOCK_FOOTER_WORD {
                return Ok(cursor + 4);
            }
            if previous == BLOCK_HEADER_WORD && word == BLOCK_HEADER_WORD {
                debug!(
                    "scan: block 0x{:06x} runs into a header at 0x{:06x}",
                    addr,
                    cursor - 4
                );
                break;
            }
            previous = word;
            cursor += 4;
        }
        Err(missing.into())
    }

    /// Start of the next block at or after `start`, skipping `skip` blocks.
    pub fn find_next_block(&mut self, start: u32, mut skip: u32) -> Result<u32> {
        let size = self.image.size();
        let mut addr = start;
        let mut previous = 0;
        while addr.saturating_add(4) <= size {
            let word = self.image.read_word(addr)?;
            if previous == BLOCK_HEADER_WORD && word == BLOCK_HEADER_WORD {
                let found = addr - 4;
                if skip == 0 {
                    return Ok(found);
                }
                skip -= 1;
                addr = self.find_block_end(found)?;
                debug!("scan: skipped block 0x{:06x}..0x{:06x}", found, addr);
                previous = 0;
                continue;
            }
            previous = word;
            addr += 4;
        }
        Err(FormatError::NoMoreBlocks { from: start }.into())
    }

    pub fn get_block_info(&mut self, addr: u32) -> Result<Block> {
        let end_addr = self.find_block_end(addr)?;

        let mut words = [0u32; 9];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.image.read_word(addr + (i as u32) * 4)?;
        }
        let block = Block {
            header: [words[0], words[1]],
            block_type: BlockType::from_u8((words[2] & 0xff) as u8),
            subtype: (words[2] >> 16) as u16,
            version: words[3],
            length: words[4],
            length_copy: words[5],
            address: words[6],
            config_data: [words[7], words[8]],
            crc: self.image.read_word(end_addr - 12)?,
            trailer: [
                self.image.read_word(end_addr - 8)?,
                self.image.read_word(end_addr - 4)?,
            ],
            start_addr: addr,
            end_addr,
        };
        debug!(
            "block {} at 0x{:06x}..0x{:06x} len 0x{:x} crc {:08x}",
            block.block_type, block.start_addr, block.end_addr, block.length, block.crc
        );
        Ok(block)
    }

    /// First block of `block_type`, walking the chain from address 0.
    ///
    /// Old layouts carry a PERSISTENT_DATA block that does not parse as a
    /// regular block; it is stepped over instead of ending the search.
    pub fn find_block_by_type(&mut self, block_type: BlockType) -> Result<Block> {
        let not_found = || Error::from(FormatError::NotFound { block_type });

        let mut addr = match self.find_next_block(0, 0) {
            Ok(addr) => addr,
            Err(e) if no_more_blocks(&e) => return Err(not_found()),
            Err(e) => return Err(e),
        };
        loop {
            let next = match self.get_block_info(addr) {
                Ok(block) if block.block_type == block_type => return Ok(block),
                Ok(block) if block.block_type == BlockType::End => return Err(not_found()),
                Ok(_) => self.find_next_block(addr, 1),
                Err(e) => {
                    if self.raw_type(addr)? != BlockType::PersistentData {
                        return Err(e);
                    }
                    warn!("scan: stepping over legacy persistent data at 0x{:06x}", addr);
                    self.find_next_block(addr + BLOCK_CRC_START, 0)
                }
            };
            addr = match next {
                Ok(addr) => addr,
                Err(e) if no_more_blocks(&e) => return Err(not_found()),
                Err(e) => return Err(e),
            };
        }
    }

    fn raw_type(&mut self, addr: u32) -> Result<BlockType> {
        Ok(BlockType::from_u8((self.image.read_word(addr + 8)? & 0xff) as u8))
    }

    /// Blocks from the one at `start` up to and including the END block.
    pub fn chain_from(&mut self, start: u32) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut addr = start;
        loop {
            let block = self.get_block_info(addr)?;
            let done = block.block_type == BlockType::End;
            blocks.push(block);
            if done {
                return Ok(blocks);
            }
            addr = self.find_next_block(addr, 1)?;
        }
    }

    /// Every block of the image, in address order, ending with END.
    pub fn blocks(&mut self) -> Result<Vec<Block>> {
        let first = self.find_next_block(0, 0)?;
        self.chain_from(first)
    }

    /// The PERSISTENT_DATA block of the image.
    ///
    /// Older layouts keep it at a fixed address, which is tried first to
    /// avoid a full scan. The scan steps over blocks that do not parse and
    /// stops at END.
    pub fn find_persistent_data(&mut self) -> Result<Block> {
        let legacy = LEGACY_PERSISTENT_DATA_ADDR;
        if legacy + 8 <= self.image.size() && self.has_header(legacy)? {
            if let Ok(chain) = self.chain_from(legacy) {
                if let Some(block) = chain
                    .into_iter()
                    .find(|b| b.block_type == BlockType::PersistentData)
                {
                    return Ok(block);
                }
            }
        }

        let not_found = || {
            Error::from(FormatError::NotFound {
                block_type: BlockType::PersistentData,
            })
        };
        let mut from = 0;
        loop {
            let addr = match self.find_next_block(from, 0) {
                Ok(addr) => addr,
                Err(e) if no_more_blocks(&e) => return Err(not_found()),
                Err(e) => return Err(e),
            };
            from = match self.get_block_info(addr) {
                Ok(block) if block.block_type == BlockType::PersistentData => return Ok(block),
                Ok(block) if block.block_type == BlockType::End => return Err(not_found()),
                Ok(block) => block.end_addr,
                Err(Error::Format(e)) => {
                    warn!("scan: stepping over unreadable block at 0x{:06x} ({})", addr, e);
                    addr + BLOCK_CRC_START
                }
                Err(e) => return Err(e),
            };
        }
    }

    /// Compare the stored CRC of `block` with the one computed over its
    /// bytes.
    pub fn check_crc(&mut self, block: &Block) -> Result<()> {
        let computed = block_crc(&self.read_block(block)?);
        if computed != block.crc {
            return Err(FormatError::CrcMismatch {
                addr: block.start_addr,
                stored: block.crc,
                computed,
            }
            .into());
        }
        Ok(())
    }

    /// The whole block, header to footer.
    pub fn read_block(&mut self, block: &Block) -> Result<Vec<u8>> {
        self.image.read_vec(block.start_addr, block.size() as usize)
    }

    pub fn read_payload(&mut self, block: &Block) -> Result<Vec<u8>> {
        self.image
            .read_vec(block.payload_addr(), block.length as usize)
    }

    /// Payload decoded as big-endian words.
    pub fn read_payload_words(&mut self, block: &Block) -> Result<Vec<u32>> {
        let bytes = self.read_payload(block)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }
}
