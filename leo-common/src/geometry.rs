// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Per-chip erase geometry.
//!
//! Each supported SPI NOR part is described by a table of address regions
//! with their block-erase size. Erase ranges are rounded out to the 4 KiB
//! subsector and covered with the largest aligned block that fits, falling
//! back to subsector erases at the edges.

use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{FLASH_PAGE_SIZE, FLASH_SUBSECTOR_SIZE, SPI_FLASH_SIZE};

pub const OP_SUBSECTOR_ERASE: u8 = 0x20;
pub const OP_BLOCK_ERASE: u8 = 0xd8;
pub const OP_CHIP_ERASE: u8 = 0xc7;

/// `[start, end)` erased in `block_size` units by a block erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EraseRegion {
    pub start: u32,
    pub end: u32,
    pub block_size: u32,
}

const fn region(start: u32, end: u32, block_size: u32) -> EraseRegion {
    EraseRegion {
        start,
        end,
        block_size,
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct FlashChip {
    pub name: &'static str,
    pub jedec_id: u32,
    pub size: u32,
    pub page_size: u32,
    pub subsector_size: u32,
    /// Needs the global block-protection register cleared before writes.
    pub block_protect: bool,
    pub regions: &'static [EraseRegion],
}

/// 8 KiB parameter blocks at both ends, 32 KiB blocks next to them.
pub static SST26WF064C: FlashChip = FlashChip {
    name: "SST26WF064C",
    jedec_id: 0xbf_2643,
    size: SPI_FLASH_SIZE,
    page_size: FLASH_PAGE_SIZE,
    subsector_size: FLASH_SUBSECTOR_SIZE,
    block_protect: true,
    regions: &[
        region(0x00_0000, 0x00_8000, 0x2000),
        region(0x00_8000, 0x01_0000, 0x8000),
        region(0x01_0000, 0x7f_0000, 0x1_0000),
        region(0x7f_0000, 0x7f_8000, 0x8000),
        region(0x7f_8000, 0x80_0000, 0x2000),
    ],
};

pub static MX25U6432F: FlashChip = FlashChip {
    name: "MX25U6432F",
    jedec_id: 0xc2_2537,
    size: SPI_FLASH_SIZE,
    page_size: FLASH_PAGE_SIZE,
    subsector_size: FLASH_SUBSECTOR_SIZE,
    block_protect: false,
    regions: &[region(0, SPI_FLASH_SIZE, 0x1_0000)],
};

pub static KNOWN_CHIPS: [&FlashChip; 2] = [&SST26WF064C, &MX25U6432F];

/// Selection of the flash part, either fixed or read from the JEDEC id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipSelect {
    #[default]
    Auto,
    Sst26wf064c,
    Mx25u6432f,
}

impl ChipSelect {
    /// The fixed part, `None` for auto-detection.
    pub fn chip(self) -> Option<&'static FlashChip> {
        match self {
            Self::Auto => None,
            Self::Sst26wf064c => Some(&SST26WF064C),
            Self::Mx25u6432f => Some(&MX25U6432F),
        }
    }
}

impl fmt::Display for ChipSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Sst26wf064c => f.write_str("sst26wf064c"),
            Self::Mx25u6432f => f.write_str("mx25u6432f"),
        }
    }
}

/// One erase command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseOp {
    pub addr: u32,
    pub size: u32,
    pub opcode: u8,
}

impl EraseOp {
    pub const fn chip(size: u32) -> Self {
        Self {
            addr: 0,
            size,
            opcode: OP_CHIP_ERASE,
        }
    }

    pub const fn is_chip(&self) -> bool {
        self.opcode == OP_CHIP_ERASE
    }

    pub const fn end(&self) -> u32 {
        self.addr + self.size
    }
}

impl FlashChip {
    pub fn from_jedec(jedec_id: u32) -> Option<&'static FlashChip> {
        KNOWN_CHIPS.iter().copied().find(|c| c.jedec_id == jedec_id)
    }

    /// Block-erase size at `addr`; subsector size outside every region.
    pub fn block_size_at(&self, addr: u32) -> u32 {
        self.regions
            .iter()
            .find(|r| r.start <= addr && addr < r.end)
            .map_or(self.subsector_size, |r| r.block_size)
    }

    /// `[start, end)` rounded out to subsector boundaries.
    pub fn erase_span(&self, start: u32, end: u32) -> Result<(u32, u32)> {
        if start > end || end > self.size {
            return Err(Error::Geometry {
                start,
                end,
                size: self.size,
            });
        }
        let mask = self.subsector_size - 1;
        let aligned_start = start & !mask;
        let aligned_end = end.checked_add(mask).ok_or(Error::Geometry {
            start,
            end,
            size: self.size,
        })? & !mask;
        Ok((aligned_start, aligned_end))
    }

    /// Erase commands covering exactly `erase_span(start, end)`.
    pub fn erase_ops(&self, start: u32, end: u32) -> Result<Vec<EraseOp>> {
        let (start, end) = self.erase_span(start, end)?;
        let mut ops = Vec::new();
        let mut addr = start;
        while addr < end {
            let block = self.block_size_at(addr);
            let op = if block > self.subsector_size && addr % block == 0 && addr + block <= end {
                EraseOp {
                    addr,
                    size: block,
                    opcode: OP_BLOCK_ERASE,
                }
            } else {
                EraseOp {
                    addr,
                    size: self.subsector_size,
                    opcode: OP_SUBSECTOR_ERASE,
                }
            };
            ops.push(op);
            addr += op.size;
        }
        Ok(ops)
    }
}
