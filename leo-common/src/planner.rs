// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware update planning.
//!
//! A plan is computed entirely from the current flash content and the
//! candidate image; nothing is erased or written here. The incremental
//! path rewrites the syscfg block and code chain of one TOC slot. Anything
//! the incremental path cannot reason about falls back to a bulk erase
//! followed by a rewrite of every candidate block.

use alloc::borrow::Cow;
use alloc::vec::Vec;

use log::{debug, info, warn};
use serde::Serialize;

use crate::block::{Block, BlockCodec, ScanLimits};
use crate::error::{Error, Result};
use crate::geometry::{EraseOp, FlashChip};
use crate::image::{FlashImage, MemImage};
use crate::protocol::{AsicRevision, BlockType};
use crate::toc::{check_supported, is_legacy_toc, read_description, read_toc, slot_index};
use crate::verify::VerifyTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanMode {
    /// Only the selected slot's syscfg and code regions are rewritten.
    Incremental,
    /// Bulk erase, then every block of the candidate.
    FullErase,
}

/// Bytes to program at `addr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteRange {
    pub addr: u32,
    pub data: Vec<u8>,
}

impl WriteRange {
    pub fn end(&self) -> u32 {
        self.addr + self.data.len() as u32
    }
}

/// Erase commands followed by the writes landing in the erased area.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlanStep {
    pub erase: Vec<EraseOp>,
    pub writes: Vec<WriteRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatePlan {
    pub mode: PlanMode,
    pub steps: Vec<PlanStep>,
    pub verify: Vec<VerifyTarget>,
}

impl UpdatePlan {
    pub fn erase_bytes(&self) -> u64 {
        self.steps
            .iter()
            .flat_map(|s| s.erase.iter())
            .map(|op| u64::from(op.size))
            .sum()
    }

    pub fn write_bytes(&self) -> u64 {
        self.steps
            .iter()
            .flat_map(|s| s.writes.iter())
            .map(|w| w.data.len() as u64)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// TOC slot to update.
    pub slot: u8,
    /// Copy PERSISTENT_DATA from flash into the candidate before writing.
    pub preserve_persistent: bool,
    /// Revision reported by the device; `None` skips the compatibility check.
    pub device_asic: Option<AsicRevision>,
    /// Always take the bulk erase path.
    pub force_full: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            slot: 0,
            preserve_persistent: true,
            device_asic: None,
            force_full: false,
        }
    }
}

/// Fail unless the candidate's DESCRIPTION block names `device`.
pub fn check_compatibility(
    candidate: &MemImage,
    device: AsicRevision,
    limits: ScanLimits,
) -> Result<()> {
    let mut codec = BlockCodec::with_limits(candidate, limits);
    let image = read_description(&mut codec)?.asic();
    if image != device {
        return Err(Error::Compatibility { image, device });
    }
    debug!("plan: image built for ASIC {}", image);
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Extent {
    start: u32,
    end: u32,
}

impl Extent {
    fn len(&self) -> u32 {
        self.end - self.start
    }
}

/// What the incremental path needs from current flash.
struct CurrentLayout {
    code: Extent,
    syscfg: Extent,
    end: Block,
}

/// Outcome of reading the slot layout of current flash.
enum FlashState {
    Layout(CurrentLayout),
    /// Readable, but it has to be rewritten in full.
    Rewrite,
    /// The TOC does not parse.
    Corrupted,
}

/// One destination range and where its bytes come from in the candidate.
#[derive(Debug, Clone, Copy)]
struct Region {
    dst: u32,
    src: u32,
    len: u32,
}

struct Cluster {
    start: u32,
    end: u32,
    regions: Vec<Region>,
}

pub struct FirmwareUpdatePlanner {
    chip: &'static FlashChip,
    limits: ScanLimits,
}

impl FirmwareUpdatePlanner {
    pub fn new(chip: &'static FlashChip) -> Self {
        Self {
            chip,
            limits: ScanLimits::default(),
        }
    }

    pub fn with_limits(chip: &'static FlashChip, limits: ScanLimits) -> Self {
        Self { chip, limits }
    }

    pub fn chip(&self) -> &'static FlashChip {
        self.chip
    }

    /// Compute the erase/write/verify sequence turning `current` into
    /// `candidate` for `opts.slot`.
    pub fn plan<C: FlashImage>(
        &self,
        current: &mut C,
        candidate: &MemImage,
        opts: &PlanOptions,
    ) -> Result<UpdatePlan> {
        slot_index(opts.slot)?;
        match opts.device_asic {
            Some(device) => check_compatibility(candidate, device, self.limits)?,
            None => {
                let mut codec = BlockCodec::with_limits(candidate, self.limits);
                if let Err(e) = read_description(&mut codec) {
                    warn!("plan: compatibility check skipped, image has no usable DESCRIPTION ({})", e);
                }
            }
        }

        let mut cur = BlockCodec::with_limits(current, self.limits);
        if !cur.has_header(0)? {
            warn!("plan: no block header at 0x000000, flash is blank or corrupted; rewriting without persistent data");
            return self.full(candidate);
        }

        let state = if opts.force_full {
            info!("plan: full rewrite requested");
            FlashState::Rewrite
        } else {
            self.current_layout(&mut cur, opts.slot)?
        };

        let candidate = if opts.preserve_persistent {
            let required = matches!(state, FlashState::Rewrite);
            self.splice_persistent(&mut cur, candidate, required)?
        } else {
            Cow::Borrowed(candidate)
        };

        match state {
            FlashState::Layout(layout) => self.incremental(&mut cur, &candidate, opts.slot, &layout),
            FlashState::Rewrite | FlashState::Corrupted => self.full(&candidate),
        }
    }

    fn current_layout<C: FlashImage>(
        &self,
        cur: &mut BlockCodec<C>,
        slot: u8,
    ) -> Result<FlashState> {
        let idx = slot_index(slot)?;
        let (toc_block, toc) = match read_toc(cur) {
            Ok(found) => found,
            Err(Error::Format(e)) => {
                warn!("plan: flash TOC unusable ({}), full rewrite", e);
                return Ok(FlashState::Corrupted);
            }
            Err(e) => return Err(e),
        };
        if is_legacy_toc(&toc_block) {
            info!("plan: flash holds a legacy TOC, full rewrite");
            return Ok(FlashState::Rewrite);
        }
        if let Err(e) = check_supported(&toc_block) {
            warn!("plan: {}, full rewrite", e);
            return Ok(FlashState::Rewrite);
        }

        let syscfg = self.extent_or_pointer(cur, toc.syscfg[idx].addr_pointer)?;
        let code = self.extent_or_pointer(cur, toc.code[idx].addr_pointer)?;
        let end = match end_after(cur, code.start) {
            Ok(end) => end,
            Err(Error::Format(e)) => {
                warn!("plan: flash code chain has no END block ({}), full rewrite", e);
                return Ok(FlashState::Rewrite);
            }
            Err(e) => return Err(e),
        };
        debug!(
            "plan: flash slot {} syscfg 0x{:06x}..0x{:06x} code 0x{:06x}..0x{:06x}",
            slot, syscfg.start, syscfg.end, code.start, end.end_addr
        );
        Ok(FlashState::Layout(CurrentLayout { code, syscfg, end }))
    }

    /// Block extent at `ptr`, or an empty extent at `ptr` when the block
    /// there does not parse.
    fn extent_or_pointer<C: FlashImage>(&self, cur: &mut BlockCodec<C>, ptr: u32) -> Result<Extent> {
        match cur.get_block_info(ptr) {
            Ok(block) => Ok(Extent {
                start: block.start_addr,
                end: block.end_addr,
            }),
            Err(Error::Format(e)) => {
                warn!("plan: flash block at 0x{:06x} unreadable ({}), using TOC pointer", ptr, e);
                Ok(Extent { start: ptr, end: ptr })
            }
            Err(e) => Err(e),
        }
    }

    /// Candidate with PERSISTENT_DATA copied from flash, or the candidate
    /// itself when there is nothing to copy.
    fn splice_persistent<'c, C: FlashImage>(
        &self,
        cur: &mut BlockCodec<C>,
        candidate: &'c MemImage,
        required: bool,
    ) -> Result<Cow<'c, MemImage>> {
        let mut cand = BlockCodec::with_limits(candidate, self.limits);
        let mem_pd = match cand.find_block_by_type(BlockType::PersistentData) {
            Ok(block) => block,
            Err(Error::Format(_)) => {
                debug!("plan: image carries no PERSISTENT_DATA block");
                return Ok(Cow::Borrowed(candidate));
            }
            Err(e) => return Err(e),
        };
        let flash_pd = match cur.find_persistent_data() {
            Ok(block) => block,
            Err(e @ Error::Format(_)) if required => return Err(e),
            Err(Error::Format(e)) => {
                warn!("plan: flash PERSISTENT_DATA not found ({}), keeping image defaults", e);
                return Ok(Cow::Borrowed(candidate));
            }
            Err(e) => return Err(e),
        };
        if flash_pd.length != mem_pd.length {
            warn!(
                "plan: PERSISTENT_DATA length differs, flash 0x{:x} image 0x{:x}",
                flash_pd.length, mem_pd.length
            );
        }
        let len = flash_pd.length.min(mem_pd.length) as usize;
        let payload = cur.read_payload(&flash_pd)?;
        let mut spliced = candidate.clone();
        spliced.write(mem_pd.payload_addr(), &payload[..len.min(payload.len())])?;
        info!(
            "plan: preserved {} bytes of PERSISTENT_DATA from 0x{:06x}",
            len, flash_pd.start_addr
        );
        Ok(Cow::Owned(spliced))
    }

    fn incremental<C: FlashImage>(
        &self,
        cur: &mut BlockCodec<C>,
        candidate: &MemImage,
        slot: u8,
        layout: &CurrentLayout,
    ) -> Result<UpdatePlan> {
        let idx = slot_index(slot)?;
        let mut cand = BlockCodec::with_limits(candidate, self.limits);
        let (mem_toc_block, mem_toc) = read_toc(&mut cand)?;
        check_supported(&mem_toc_block)?;
        let mem_syscfg = cand.get_block_info(mem_toc.syscfg[idx].addr_pointer)?;
        let mem_code = cand.get_block_info(mem_toc.code[idx].addr_pointer)?;
        let mem_end = end_after(&mut cand, mem_code.start_addr)?;

        let flash_code_len = layout.end.end_addr - layout.code.start;
        let mem_code_len = mem_end.end_addr - mem_code.start_addr;
        let regions = [
            Region {
                dst: layout.syscfg.start,
                src: mem_syscfg.start_addr,
                len: layout.syscfg.len().max(mem_syscfg.size()),
            },
            Region {
                dst: layout.code.start,
                src: mem_code.start_addr,
                len: flash_code_len.max(mem_code_len),
            },
        ];

        let mut clusters: Vec<Cluster> = Vec::new();
        for region in regions {
            let (start, end) = self.chip
                .erase_span(region.dst, region.dst.saturating_add(region.len))?;
            match clusters.iter_mut().find(|c| start < c.end && c.start < end) {
                Some(cluster) => {
                    cluster.start = cluster.start.min(start);
                    cluster.end = cluster.end.max(end);
                    cluster.regions.push(region);
                }
                None => clusters.push(Cluster {
                    start,
                    end,
                    regions: alloc::vec![region],
                }),
            }
        }

        let mut steps = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            let erase = self.chip.erase_ops(cluster.start, cluster.end)?;
            let mut writes = Vec::new();
            for region in &cluster.regions {
                let data = candidate.slice(region.src, region.len as usize)?.to_vec();
                writes.push(WriteRange {
                    addr: region.dst,
                    data,
                });
            }
            writes.sort_by_key(|w| w.addr);
            // Bytes erased but not rewritten are restored from current flash.
            let mut restore = Vec::new();
            let mut cursor = cluster.start;
            for write in &writes {
                if write.addr > cursor {
                    restore.push((cursor, write.addr));
                }
                cursor = cursor.max(write.end());
            }
            if cursor < cluster.end {
                restore.push((cursor, cluster.end));
            }
            for (start, end) in restore {
                let data = cur.image().read_vec(start, (end - start) as usize)?;
                if data.iter().all(|b| *b == 0xff) {
                    continue;
                }
                debug!("plan: restoring 0x{:06x}..0x{:06x}", start, end);
                writes.push(WriteRange { addr: start, data });
            }
            writes.sort_by_key(|w| w.addr);
            steps.push(PlanStep { erase, writes });
        }

        let mut verify = alloc::vec![VerifyTarget::at(layout.syscfg.start, &mem_syscfg)];
        for block in cand.chain_from(mem_code.start_addr)? {
            if block.block_type == BlockType::PersistentData {
                continue;
            }
            let dst = layout.code.start + (block.start_addr - mem_code.start_addr);
            verify.push(VerifyTarget::at(dst, &block));
        }

        let plan = UpdatePlan {
            mode: PlanMode::Incremental,
            steps,
            verify,
        };
        info!(
            "plan: incremental update of slot {}: {} erase bytes, {} write bytes, {} verify targets",
            slot,
            plan.erase_bytes(),
            plan.write_bytes(),
            plan.verify.len()
        );
        Ok(plan)
    }

    fn full(&self, candidate: &MemImage) -> Result<UpdatePlan> {
        let mut cand = BlockCodec::with_limits(candidate, self.limits);
        let blocks = cand.blocks()?;
        let mut writes = Vec::with_capacity(blocks.len());
        for block in &blocks {
            if block.end_addr > self.chip.size {
                return Err(Error::Geometry {
                    start: block.start_addr,
                    end: block.end_addr,
                    size: self.chip.size,
                });
            }
            writes.push(WriteRange {
                addr: block.start_addr,
                data: candidate.slice(block.start_addr, block.size() as usize)?.to_vec(),
            });
        }
        let verify = blocks
            .iter()
            .filter(|b| b.block_type != BlockType::PersistentData)
            .map(VerifyTarget::of_block)
            .collect();
        let plan = UpdatePlan {
            mode: PlanMode::FullErase,
            steps: alloc::vec![PlanStep {
                erase: alloc::vec![EraseOp::chip(self.chip.size)],
                writes,
            }],
            verify,
        };
        info!(
            "plan: full rewrite of {} blocks, {} write bytes",
            blocks.len(),
            plan.write_bytes()
        );
        Ok(plan)
    }
}

/// First END block following the block at `start`.
fn end_after<I: FlashImage>(codec: &mut BlockCodec<I>, start: u32) -> Result<Block> {
    let skip = u32::from(codec.has_header(start)?);
    let mut addr = codec.find_next_block(start, skip)?;
    loop {
        let block = codec.get_block_info(addr)?;
        if block.block_type == BlockType::End {
            return Ok(block);
        }
        addr = codec.find_next_block(addr, 1)?;
    }
}

