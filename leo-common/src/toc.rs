// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Table of contents and description block payloads.
//!
//! The TOC block payload is a fixed array of big-endian words:
//! three code slot entries, a config record, then three syscfg entries.
//! `resolve` follows a slot's pointers to the code and syscfg blocks.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockCodec};
use crate::error::{FormatError, Result};
use crate::image::FlashImage;
use crate::protocol::{AsicRevision, BlockType, TOC_FORMAT_VERSION, TOC_SLOT_COUNT};

const CODE_ENTRY_WORDS: usize = 7;
const CONFIG_WORDS: usize = 8;
const SYSCFG_ENTRY_WORDS: usize = 7;

/// Primary flag, duplicated in bits 24 and 16 of a code entry config.
pub const CODE_PRIMARY_MASK: u32 = 0x0101_0000;
/// Valid flag, duplicated in bits 8 and 0 of a code entry config.
pub const CODE_VALID_MASK: u32 = 0x0000_0101;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSlot {
    pub slot_id: u32,
    pub img_version: u32,
    pub img_version_copy: u32,
    pub config: u32,
    pub buffer: u32,
    pub addr_pointer: u32,
    pub addr_pointer_copy: u32,
}

impl CodeSlot {
    pub fn is_primary(&self) -> bool {
        self.config & CODE_PRIMARY_MASK != 0
    }

    pub fn is_valid(&self) -> bool {
        self.config & CODE_VALID_MASK != 0
    }

    fn decode(w: &[u32]) -> Self {
        Self {
            slot_id: w[0],
            img_version: w[1],
            img_version_copy: w[2],
            config: w[3],
            buffer: w[4],
            addr_pointer: w[5],
            addr_pointer_copy: w[6],
        }
    }

    fn encode(&self) -> [u32; CODE_ENTRY_WORDS] {
        [
            self.slot_id,
            self.img_version,
            self.img_version_copy,
            self.config,
            self.buffer,
            self.addr_pointer,
            self.addr_pointer_copy,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocConfig {
    pub reserved: [u32; 7],
    pub num_syscfg_entries: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscfgSlot {
    pub slot_id: u32,
    pub valid: u32,
    pub buffer: u32,
    pub addr_pointer: u32,
    pub addr_pointer_copy: u32,
    pub code_slot_correlation: u32,
    pub load_priority: u32,
}

impl SyscfgSlot {
    pub fn is_valid(&self) -> bool {
        self.valid != 0
    }

    fn decode(w: &[u32]) -> Self {
        Self {
            slot_id: w[0],
            valid: w[1],
            buffer: w[2],
            addr_pointer: w[3],
            addr_pointer_copy: w[4],
            code_slot_correlation: w[5],
            load_priority: w[6],
        }
    }

    fn encode(&self) -> [u32; SYSCFG_ENTRY_WORDS] {
        [
            self.slot_id,
            self.valid,
            self.buffer,
            self.addr_pointer,
            self.addr_pointer_copy,
            self.code_slot_correlation,
            self.load_priority,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOfContents {
    pub code: [CodeSlot; TOC_SLOT_COUNT],
    pub config: TocConfig,
    pub syscfg: [SyscfgSlot; TOC_SLOT_COUNT],
}

impl TableOfContents {
    /// Payload size in words.
    pub const WORDS: usize =
        TOC_SLOT_COUNT * CODE_ENTRY_WORDS + CONFIG_WORDS + TOC_SLOT_COUNT * SYSCFG_ENTRY_WORDS;

    pub fn decode(words: &[u32]) -> core::result::Result<Self, FormatError> {
        if words.len() < Self::WORDS {
            return Err(FormatError::Truncated {
                len: words.len() * 4,
                need: Self::WORDS * 4,
            });
        }
        let mut toc = Self::default();
        for (i, slot) in toc.code.iter_mut().enumerate() {
            let at = i * CODE_ENTRY_WORDS;
            *slot = CodeSlot::decode(&words[at..at + CODE_ENTRY_WORDS]);
        }
        let cfg = TOC_SLOT_COUNT * CODE_ENTRY_WORDS;
        toc.config.reserved.copy_from_slice(&words[cfg..cfg + 7]);
        toc.config.num_syscfg_entries = words[cfg + 7];
        let base = cfg + CONFIG_WORDS;
        for (i, slot) in toc.syscfg.iter_mut().enumerate() {
            let at = base + i * SYSCFG_ENTRY_WORDS;
            *slot = SyscfgSlot::decode(&words[at..at + SYSCFG_ENTRY_WORDS]);
        }
        Ok(toc)
    }

    /// Payload bytes as stored in flash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words = Vec::with_capacity(Self::WORDS);
        for slot in &self.code {
            words.extend_from_slice(&slot.encode());
        }
        words.extend_from_slice(&self.config.reserved);
        words.push(self.config.num_syscfg_entries);
        for slot in &self.syscfg {
            words.extend_from_slice(&slot.encode());
        }
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    /// First code slot flagged primary.
    pub fn primary_slot(&self) -> Option<u8> {
        self.code.iter().position(CodeSlot::is_primary).map(|i| i as u8)
    }

    /// Valid syscfg entries correlated with `code_slot`.
    pub fn correlated_syscfg(&self, code_slot: u8) -> impl Iterator<Item = &SyscfgSlot> {
        self.syscfg
            .iter()
            .filter(move |s| s.is_valid() && s.code_slot_correlation == u32::from(code_slot))
    }
}

/// Pre 0.8 images carry a zero format word in the TOC config data.
pub fn is_legacy_toc(block: &Block) -> bool {
    block.config_data[0] == 0
}

/// Reject TOC layouts the incremental updater does not understand.
pub fn check_supported(block: &Block) -> core::result::Result<(), FormatError> {
    if block.config_data[0] != 1 || block.config_data[1] != 0 || block.version != TOC_FORMAT_VERSION
    {
        return Err(FormatError::UnsupportedToc {
            config0: block.config_data[0],
            config1: block.config_data[1],
            version: block.version,
        });
    }
    Ok(())
}

/// Validated slot index.
pub fn slot_index(slot: u8) -> core::result::Result<usize, FormatError> {
    let idx = usize::from(slot);
    if idx >= TOC_SLOT_COUNT {
        return Err(FormatError::InvalidSlot { slot });
    }
    Ok(idx)
}

/// Locate the TOC block and decode its payload.
pub fn read_toc<I: FlashImage>(codec: &mut BlockCodec<I>) -> Result<(Block, TableOfContents)> {
    let block = codec.find_block_by_type(BlockType::Toc)?;
    codec.check_crc(&block)?;
    let need = (TableOfContents::WORDS * 4) as u32;
    if block.length < need {
        return Err(FormatError::Truncated {
            len: block.length as usize,
            need: need as usize,
        }
        .into());
    }
    // Only the fixed part is read; trailing payload is reserved.
    let bytes = codec.image().read_vec(block.payload_addr(), need as usize)?;
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    let toc = TableOfContents::decode(&words)?;
    Ok((block, toc))
}

/// Code block and syscfg block of `slot`.
///
/// Fails closed on any TOC revision other than the supported one.
pub fn resolve<I: FlashImage>(codec: &mut BlockCodec<I>, slot: u8) -> Result<(Block, Block)> {
    let idx = slot_index(slot)?;
    let (block, toc) = read_toc(codec)?;
    check_supported(&block)?;
    let code = codec.get_block_info(toc.code[idx].addr_pointer)?;
    let syscfg = codec.get_block_info(toc.syscfg[idx].addr_pointer)?;
    Ok((code, syscfg))
}

/// One entry of the DESCRIPTION block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionEntry {
    pub asic_version: u32,
    pub build_id: u32,
    pub builder: u32,
    pub fw_version: u32,
}

impl DescriptionEntry {
    pub const WORDS: usize = 14;

    pub fn decode(w: &[u32]) -> core::result::Result<Self, FormatError> {
        if w.len() < Self::WORDS {
            return Err(FormatError::Truncated {
                len: w.len() * 4,
                need: Self::WORDS * 4,
            });
        }
        Ok(Self {
            asic_version: w[6],
            build_id: w[8],
            builder: w[9],
            fw_version: w[10],
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words = [0u32; Self::WORDS];
        words[6] = self.asic_version;
        words[8] = self.build_id;
        words[9] = self.builder;
        words[10] = self.fw_version;
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    pub fn asic(&self) -> AsicRevision {
        AsicRevision::from_image_marker(self.asic_version)
    }
}

/// First entry of the image's DESCRIPTION block.
pub fn read_description<I: FlashImage>(codec: &mut BlockCodec<I>) -> Result<DescriptionEntry> {
    let block = codec.find_block_by_type(BlockType::Description)?;
    let words = codec.read_payload_words(&block)?;
    Ok(DescriptionEntry::decode(&words)?)
}
