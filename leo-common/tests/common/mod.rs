// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared fixtures: synthetic images, a scripted register file, an
//! in-memory NOR chip and a CRC verifier over it.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use leo_common::block::NewBlock;
use leo_common::crc::crc_words_be;
use leo_common::error::{Error, Result, TransportError};
use leo_common::geometry::{EraseOp, FlashChip};
use leo_common::image::MemImage;
use leo_common::protocol::{
    BlockType, FW_CRC_VERIFY_MARKER, MM_CMD_OFFSET, MM_DATA_OFFSET, MM_DOORBELL_BIT,
    MM_MAILBOX_BASE, MM_STATUS_OFFSET, PMBOX_BASE, PMBOX_CMD_OFFSET, PMBOX_CTL_OFFSET,
    PMBOX_PAYLOAD_OFFSET, PMBOX_STS_OFFSET, SPI_FLASH_SIZE, TOC_FORMAT_VERSION,
};
use leo_common::toc::{
    CodeSlot, DescriptionEntry, SyscfgSlot, TableOfContents, CODE_PRIMARY_MASK, CODE_VALID_MASK,
};
use leo_common::verify::{BlockVerifier, VerifyTarget};
use leo_common::NorFlash;

// Synthetic images

pub const FLASH_CTRL_ADDR: u32 = 0x00_0000;
pub const TOC_ADDR: u32 = 0x00_0100;
pub const DESCRIPTION_ADDR: u32 = 0x00_0400;

/// Where blocks go and what they hold.
#[derive(Debug, Clone)]
pub struct Layout {
    pub asic_marker: u32,
    pub toc_config: [u32; 2],
    pub toc_version: u32,
    pub syscfg_addr: u32,
    pub syscfg_payload: Vec<u8>,
    pub pd_addr: Option<u32>,
    pub pd_payload: Vec<u8>,
    pub code_addr: u32,
    /// Payloads of consecutive MAIN blocks; END follows the last one.
    pub code_payloads: Vec<Vec<u8>>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            asic_marker: 0xd5,
            toc_config: [1, 0],
            toc_version: TOC_FORMAT_VERSION,
            syscfg_addr: 0x00_4000,
            syscfg_payload: pattern(0x200, 0x10),
            pd_addr: Some(0x00_6000),
            pd_payload: pattern(0x100, 0x40),
            code_addr: 0x01_0000,
            code_payloads: vec![pattern(0x1000, 0x01), pattern(0x400, 0x02)],
        }
    }
}

/// Deterministic non-0xFF filler.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed) & 0x7f)
        .collect()
}

pub fn block_bytes(block_type: BlockType, payload: &[u8]) -> Vec<u8> {
    NewBlock::new(block_type, payload).encode()
}

pub fn toc_for(layout: &Layout) -> TableOfContents {
    let mut toc = TableOfContents::default();
    toc.code[0] = CodeSlot {
        slot_id: 0,
        img_version: 1,
        img_version_copy: 1,
        config: CODE_PRIMARY_MASK | CODE_VALID_MASK,
        buffer: 0,
        addr_pointer: layout.code_addr,
        addr_pointer_copy: layout.code_addr,
    };
    toc.config.num_syscfg_entries = 1;
    toc.syscfg[0] = SyscfgSlot {
        slot_id: 0,
        valid: 1,
        buffer: 0,
        addr_pointer: layout.syscfg_addr,
        addr_pointer_copy: layout.syscfg_addr,
        code_slot_correlation: 0,
        load_priority: 0,
    };
    toc
}

/// Image with FLASH_CTRL, TOC, DESCRIPTION, syscfg, optional
/// PERSISTENT_DATA and a code chain ending with END.
pub fn build_image(layout: &Layout) -> MemImage {
    let mut image = MemImage::blank(SPI_FLASH_SIZE);
    let mut put = |addr: u32, bytes: Vec<u8>| image.write(addr, &bytes).unwrap();

    put(FLASH_CTRL_ADDR, block_bytes(BlockType::FlashCtrl, &pattern(16, 0x30)));

    let toc_bytes = toc_for(layout).to_bytes();
    let mut toc = NewBlock::new(BlockType::Toc, &toc_bytes);
    toc.config_data = layout.toc_config;
    toc.version = layout.toc_version;
    put(TOC_ADDR, toc.encode());

    let description = DescriptionEntry {
        asic_version: layout.asic_marker,
        build_id: 0x1234,
        builder: 7,
        fw_version: 0x0102,
    }
    .to_bytes();
    put(DESCRIPTION_ADDR, block_bytes(BlockType::Description, &description));

    put(
        layout.syscfg_addr,
        block_bytes(BlockType::SystemConfig, &layout.syscfg_payload),
    );
    if let Some(pd) = layout.pd_addr {
        put(pd, block_bytes(BlockType::PersistentData, &layout.pd_payload));
    }

    let mut addr = layout.code_addr;
    for payload in &layout.code_payloads {
        let bytes = block_bytes(BlockType::Main, payload);
        let len = bytes.len() as u32;
        put(addr, bytes);
        addr += len;
    }
    put(addr, block_bytes(BlockType::End, &[]));
    image
}

pub fn standard_image() -> MemImage {
    build_image(&Layout::default())
}

// Delay

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct CountingDelay {
    pub total_us: u64,
    pub calls: u32,
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_us += u64::from(ns / 1000);
        self.calls += 1;
    }

    fn delay_us(&mut self, us: u32) {
        self.total_us += u64::from(us);
        self.calls += 1;
    }
}

// Register file

pub type Regs = HashMap<u32, u32>;
type Hook = Box<dyn FnMut(&mut Regs, u32)>;

/// In-memory register file. Hooks fire after a write to their address and
/// may update any register, which is how device behaviour is emulated.
#[derive(Default)]
pub struct ScriptedTransport {
    pub regs: Regs,
    pub writes: Vec<(u32, u32)>,
    pub reads: Vec<u32>,
    /// Reads from this address fail.
    pub fail_read_at: Option<u32>,
    hooks: Vec<(u32, Hook)>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reg(mut self, addr: u32, value: u32) -> Self {
        self.regs.insert(addr, value);
        self
    }

    pub fn on_write(&mut self, addr: u32, hook: impl FnMut(&mut Regs, u32) + 'static) {
        self.hooks.push((addr, Box::new(hook)));
    }

    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Emulate the MM mailbox firmware. `respond` gets opcode, address and
    /// input words and returns a status and output words.
    pub fn mm_firmware(
        &mut self,
        mut respond: impl FnMut(u16, u32, &[u32]) -> (u32, Vec<u32>) + 'static,
    ) {
        let base = MM_MAILBOX_BASE;
        self.on_write(base + MM_CMD_OFFSET, move |regs, value| {
            if value & MM_DOORBELL_BIT == 0 {
                return;
            }
            let opcode = (value & 0xffff) as u16;
            let len = (value >> 24) as usize;
            let addr = regs.get(&base).copied().unwrap_or(0);
            let input: Vec<u32> = (0..len)
                .map(|i| regs.get(&(base + MM_DATA_OFFSET + 4 * i as u32)).copied().unwrap_or(0))
                .collect();
            let (status, output) = respond(opcode, addr, &input);
            for (i, word) in output.iter().enumerate() {
                regs.insert(base + MM_DATA_OFFSET + 4 * i as u32, *word);
            }
            regs.insert(base + MM_STATUS_OFFSET, status << 24);
            regs.insert(base + MM_CMD_OFFSET, value & !MM_DOORBELL_BIT);
        });
    }

    /// Emulate the CXL PMBOX. `respond` gets opcode and input bytes and
    /// returns a return code and output bytes.
    pub fn pmbox_device(
        &mut self,
        mut respond: impl FnMut(u16, &[u8]) -> (u32, Vec<u8>) + 'static,
    ) {
        let base = PMBOX_BASE;
        self.on_write(base + PMBOX_CTL_OFFSET, move |regs, value| {
            if value & 1 == 0 {
                return;
            }
            let cmd = regs.get(&(base + PMBOX_CMD_OFFSET)).copied().unwrap_or(0);
            let opcode = (cmd & 0xffff) as u16;
            let len = (cmd >> 16) as usize;
            let mut input = Vec::with_capacity(len);
            for i in 0..len.div_ceil(4) {
                let word = regs
                    .get(&(base + PMBOX_PAYLOAD_OFFSET + 4 * i as u32))
                    .copied()
                    .unwrap_or(0);
                input.extend_from_slice(&word.to_le_bytes());
            }
            input.truncate(len);
            let (rc, output) = respond(opcode, &input);
            for (i, chunk) in output.chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                regs.insert(base + PMBOX_PAYLOAD_OFFSET + 4 * i as u32, u32::from_le_bytes(word));
            }
            regs.insert(
                base + PMBOX_CMD_OFFSET,
                (cmd & 0xffff) | ((output.len() as u32) << 16),
            );
            regs.insert(base + PMBOX_STS_OFFSET + 4, rc);
            regs.insert(base + PMBOX_CTL_OFFSET, 0);
        });
    }
}

impl leo_common::RegisterTransport for ScriptedTransport {
    fn read_word(&mut self, addr: u32) -> std::result::Result<u32, TransportError> {
        if self.fail_read_at == Some(addr) {
            return Err(TransportError::new(addr, "scripted failure"));
        }
        self.reads.push(addr);
        Ok(self.regs.get(&addr).copied().unwrap_or(0))
    }

    fn write_word(&mut self, addr: u32, value: u32) -> std::result::Result<(), TransportError> {
        self.writes.push((addr, value));
        self.regs.insert(addr, value);
        for (at, hook) in self.hooks.iter_mut() {
            if *at == addr {
                hook(&mut self.regs, value);
            }
        }
        Ok(())
    }
}

// NOR flash

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOp {
    Erase { addr: u32, size: u32, opcode: u8 },
    BulkErase,
    Program { addr: u32, len: usize },
    Protect(bool),
}

#[derive(Debug)]
pub struct SimState {
    pub data: Vec<u8>,
    pub log: Vec<FlashOp>,
    pub protected: bool,
}

/// NOR chip in memory: erase sets 0xFF, program clears bits. Clones share
/// the same chip.
#[derive(Debug, Clone)]
pub struct SimFlash {
    pub chip: &'static FlashChip,
    pub state: Rc<RefCell<SimState>>,
}

impl SimFlash {
    pub fn blank(chip: &'static FlashChip) -> Self {
        Self {
            chip,
            state: Rc::new(RefCell::new(SimState {
                data: vec![0xff; chip.size as usize],
                log: Vec::new(),
                protected: chip.block_protect,
            })),
        }
    }

    pub fn with_image(chip: &'static FlashChip, image: &MemImage) -> Self {
        let flash = Self::blank(chip);
        flash.state.borrow_mut().data.copy_from_slice(image.as_bytes());
        flash
    }

    pub fn bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        let state = self.state.borrow();
        state.data[addr as usize..addr as usize + len].to_vec()
    }

    pub fn poke(&self, addr: u32, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.data[addr as usize..addr as usize + bytes.len()].copy_from_slice(bytes);
    }

    pub fn log(&self) -> Vec<FlashOp> {
        self.state.borrow().log.clone()
    }

    pub fn erases(&self) -> Vec<FlashOp> {
        self.log()
            .into_iter()
            .filter(|op| matches!(op, FlashOp::Erase { .. } | FlashOp::BulkErase))
            .collect()
    }

    pub fn is_protected(&self) -> bool {
        self.state.borrow().protected
    }
}

impl NorFlash for SimFlash {
    fn chip(&self) -> &'static FlashChip {
        self.chip
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        leo_common::image::check_range(addr, buf.len(), self.chip.size)?;
        let state = self.state.borrow();
        buf.copy_from_slice(&state.data[addr as usize..addr as usize + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, op: &EraseOp) -> Result<()> {
        if op.is_chip() {
            return self.bulk_erase();
        }
        let mut state = self.state.borrow_mut();
        assert!(!state.protected, "erase while block protected");
        assert_eq!(op.addr % op.size, 0, "misaligned erase at 0x{:x}", op.addr);
        let at = op.addr as usize;
        state.data[at..at + op.size as usize].fill(0xff);
        state.log.push(FlashOp::Erase {
            addr: op.addr,
            size: op.size,
            opcode: op.opcode,
        });
        Ok(())
    }

    fn bulk_erase(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        assert!(!state.protected, "bulk erase while block protected");
        state.data.fill(0xff);
        state.log.push(FlashOp::BulkErase);
        Ok(())
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let page = self.chip.page_size;
        let end = addr + data.len() as u32;
        if data.is_empty() || addr / page != (end - 1) / page {
            return Err(Error::Geometry {
                start: addr,
                end,
                size: self.chip.size,
            });
        }
        let mut state = self.state.borrow_mut();
        assert!(!state.protected, "program while block protected");
        for (i, byte) in data.iter().enumerate() {
            state.data[addr as usize + i] &= *byte;
        }
        state.log.push(FlashOp::Program {
            addr,
            len: data.len(),
        });
        Ok(())
    }

    fn set_block_protect(&mut self, enabled: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.protected = enabled;
        state.log.push(FlashOp::Protect(enabled));
        Ok(())
    }
}

// Verifier

/// Computes the block CRC over a [`SimFlash`], as the firmware would.
#[derive(Debug, Clone)]
pub struct SimVerifier {
    pub flash: SimFlash,
    pub checked: Vec<VerifyTarget>,
}

impl SimVerifier {
    pub fn new(flash: SimFlash) -> Self {
        Self {
            flash,
            checked: Vec::new(),
        }
    }
}

impl BlockVerifier for SimVerifier {
    fn verify_block(&mut self, start: u32, len_words: u32, expected_crc: u32) -> Result<()> {
        self.checked.push(VerifyTarget {
            start,
            len_words,
            crc: expected_crc,
        });
        let bytes = self.flash.bytes(start, len_words as usize * 4);
        let actual = crc_words_be(&bytes[8..bytes.len() - 12]);
        if actual == expected_crc {
            Ok(())
        } else {
            Err(Error::Verification {
                addr: start,
                expected: expected_crc,
                actual,
                status: 1,
                marker: FW_CRC_VERIFY_MARKER,
            })
        }
    }
}
