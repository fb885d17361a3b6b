// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Post-write CRC verification.
//!
//! The device firmware recomputes a block CRC over flash and compares it to
//! the value recorded in the candidate image. Target lists are built from
//! the block chain; running them is the verifier's job.

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockCodec};
use crate::error::{Error, FormatError, Result};
use crate::image::FlashImage;
use crate::mailbox::{crc_response_ok, MmChannel};
use crate::progress::{Phase, Progress};
use crate::protocol::BlockType;
use crate::toc::read_toc;
use crate::transport::RegisterTransport;

/// One CRC check: `len_words` words of flash at `start` must CRC to `crc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyTarget {
    pub start: u32,
    pub len_words: u32,
    pub crc: u32,
}

impl VerifyTarget {
    /// Check `block` in place against its own recorded CRC.
    pub fn of_block(block: &Block) -> Self {
        Self::at(block.start_addr, block)
    }

    /// Check flash at `start` against the size and CRC of `expected`.
    pub fn at(start: u32, expected: &Block) -> Self {
        Self {
            start,
            len_words: expected.len_words(),
            crc: expected.crc,
        }
    }
}

/// Something that can confirm a written flash range.
pub trait BlockVerifier {
    fn verify_block(&mut self, start: u32, len_words: u32, expected_crc: u32) -> Result<()>;
}

impl<V: BlockVerifier + ?Sized> BlockVerifier for &mut V {
    fn verify_block(&mut self, start: u32, len_words: u32, expected_crc: u32) -> Result<()> {
        (**self).verify_block(start, len_words, expected_crc)
    }
}

/// Verification through the firmware's FW_CRC_VERIFY mailbox command.
pub struct CrcVerifier<'a, T, D> {
    mm: MmChannel<'a, T, D>,
}

impl<'a, T: RegisterTransport, D: DelayNs> CrcVerifier<'a, T, D> {
    pub fn new(mm: MmChannel<'a, T, D>) -> Self {
        Self { mm }
    }
}

impl<T: RegisterTransport, D: DelayNs> BlockVerifier for CrcVerifier<'_, T, D> {
    fn verify_block(&mut self, start: u32, len_words: u32, expected_crc: u32) -> Result<()> {
        let response = self.mm.fw_crc_verify(start, len_words, expected_crc)?;
        info!(
            "verify: block 0x{:06x} len 0x{:x} crc {:08x} expected {:08x}",
            start, len_words, response[1], expected_crc
        );
        if crc_response_ok(&response, expected_crc) {
            Ok(())
        } else {
            Err(Error::Verification {
                addr: start,
                expected: expected_crc,
                actual: response[1],
                status: response[0],
                marker: response[3],
            })
        }
    }
}

/// Run every target.
///
/// A CRC mismatch does not stop the walk; the first one is returned once
/// all targets were checked. Any other error aborts immediately.
pub fn run_targets<V, P>(verifier: &mut V, targets: &[VerifyTarget], progress: &mut P) -> Result<()>
where
    V: BlockVerifier + ?Sized,
    P: Progress + ?Sized,
{
    progress.start(Phase::Verify, targets.len() as u64);
    let mut first_failure = None;
    for target in targets {
        match verifier.verify_block(target.start, target.len_words, target.crc) {
            Ok(()) => {}
            Err(e @ Error::Verification { .. }) => {
                error!("verify: {}", e);
                first_failure.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
        progress.advance(1);
    }
    progress.finish(Phase::Verify);
    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Every block of the image except PERSISTENT_DATA, at its own address.
pub fn all_block_targets<I: FlashImage>(image: &mut BlockCodec<I>) -> Result<Vec<VerifyTarget>> {
    Ok(image
        .blocks()?
        .iter()
        .filter(|b| b.block_type != BlockType::PersistentData)
        .map(VerifyTarget::of_block)
        .collect())
}

/// Targets checking what is in flash against the candidate image:
/// TOC, DESCRIPTION, FLASH_CTRL, the primary code chain and the syscfg
/// block correlated with it.
pub fn image_targets<C, I>(
    current: &mut BlockCodec<C>,
    candidate: &mut BlockCodec<I>,
) -> Result<Vec<VerifyTarget>>
where
    C: FlashImage,
    I: FlashImage,
{
    let mut targets = Vec::new();

    let (flash_toc_block, flash_toc) = read_toc(current)?;
    let (mem_toc_block, mem_toc) = read_toc(candidate)?;
    // Flash block extent, image CRC.
    targets.push(in_place(&flash_toc_block, mem_toc_block.crc));

    if flash_toc_block.config_data[0] != mem_toc_block.config_data[0] {
        return Err(FormatError::TocMismatch {
            flash: flash_toc_block.config_data[0],
            image: mem_toc_block.config_data[0],
        }
        .into());
    }

    let mut fixed = Vec::new();
    if flash_toc_block.config_data[0] == 1 {
        fixed.push(BlockType::Description);
    }
    fixed.push(BlockType::FlashCtrl);
    for block_type in fixed {
        let flash = current.find_block_by_type(block_type)?;
        let mem = candidate.find_block_by_type(block_type)?;
        targets.push(in_place(&flash, mem.crc));
    }

    let mem_code = candidate.get_block_info(mem_toc.code[0].addr_pointer)?;
    let mut primary = None;
    for (slot, entry) in flash_toc.code.iter().enumerate() {
        if !entry.is_primary() {
            continue;
        }
        primary = Some(slot as u8);
        let chain = current.chain_from(entry.addr_pointer)?;
        let Some(first) = chain.first() else {
            continue;
        };
        let base = first.start_addr;
        for (i, block) in chain.iter().enumerate() {
            if block.block_type == BlockType::PersistentData {
                continue;
            }
            let crc = if i == 0 {
                mem_code.crc
            } else {
                let relocated = mem_code.start_addr + (block.start_addr - base);
                candidate.get_block_info(relocated)?.crc
            };
            targets.push(in_place(block, crc));
        }
    }

    if let Some(primary) = primary {
        let mem_syscfg = candidate.get_block_info(mem_toc.syscfg[0].addr_pointer)?;
        for entry in flash_toc.correlated_syscfg(primary) {
            let flash = current.get_block_info(entry.addr_pointer)?;
            targets.push(in_place(&flash, mem_syscfg.crc));
        }
    }
    Ok(targets)
}

fn in_place(flash: &Block, crc: u32) -> VerifyTarget {
    VerifyTarget {
        start: flash.start_addr,
        len_words: flash.len_words(),
        crc,
    }
}
