// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! SPI NOR flash behind the device's DW_apb_ssi controller.
//!
//! Commands are pushed into the controller TX FIFO through plain register
//! writes. Bulk read data is drained from the RX FIFO by the firmware
//! (MM `CSR_READ` on the data register), 16 words at a time.
//!
//! Data words travel MSB first, so a FIFO word is the big-endian view of
//! four flash bytes.

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use log::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::{EraseOp, FlashChip};
use crate::image::{check_range, FlashImage};
use crate::mailbox::MmChannel;
use crate::protocol::RetryPolicy;
use crate::transport::{BusGuard, RegisterTransport, SharedBus};

/// Operations the programmer needs from a NOR chip.
pub trait NorFlash {
    fn chip(&self) -> &'static FlashChip;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Subsector or block erase; a chip-erase op is a bulk erase.
    fn erase(&mut self, op: &EraseOp) -> Result<()>;

    fn bulk_erase(&mut self) -> Result<()>;

    /// Program up to one page. `data` must not cross a page boundary.
    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    fn set_block_protect(&mut self, enabled: bool) -> Result<()>;
}

impl<F: NorFlash + ?Sized> NorFlash for &mut F {
    fn chip(&self) -> &'static FlashChip {
        (**self).chip()
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, buf)
    }

    fn erase(&mut self, op: &EraseOp) -> Result<()> {
        (**self).erase(op)
    }

    fn bulk_erase(&mut self) -> Result<()> {
        (**self).bulk_erase()
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).program_page(addr, data)
    }

    fn set_block_protect(&mut self, enabled: bool) -> Result<()> {
        (**self).set_block_protect(enabled)
    }
}

// DW_apb_ssi register map
pub const SSI_BASE: u32 = 0x6000;
pub const SSI_CTRLR0: u32 = 0x00;
pub const SSI_CTRLR1: u32 = 0x04;
pub const SSI_SSIENR: u32 = 0x08;
pub const SSI_SER: u32 = 0x10;
pub const SSI_BAUDR: u32 = 0x14;
pub const SSI_TXFLR: u32 = 0x20;
pub const SSI_RXFLR: u32 = 0x24;
pub const SSI_SR: u32 = 0x28;
pub const SSI_ICR: u32 = 0x48;
pub const SSI_DR: u32 = 0x60;
pub const SSI_SPI_CTRLR0: u32 = 0xf4;

pub const SSI_FIFO_DEPTH: usize = 32;
const SR_BUSY: u32 = 1 << 0;
const SR_TFE: u32 = 1 << 2;

/// Transmit only, 8-bit frames.
const CTRLR0_TX_8: u32 = 0x07_0100;
/// EEPROM read, 8-bit frames.
const CTRLR0_RD_8: u32 = 0x07_0300;
/// Transmit only, 32-bit frames.
const CTRLR0_TX_32: u32 = 0x1f_0100;
/// EEPROM read, 32-bit frames.
const CTRLR0_RD_32: u32 = 0x1f_0300;
const BAUDR_SCKDV: u32 = 1000;
const SPI_CTRLR0_INST_L8: u32 = 0x200;

// SPI NOR commands
pub const CMD_WRITE_ENABLE: u8 = 0x06;
pub const CMD_READ_STATUS: u8 = 0x05;
pub const CMD_READ: u8 = 0x03;
pub const CMD_PAGE_PROGRAM: u8 = 0x02;
pub const CMD_READ_JEDEC: u8 = 0x9f;
pub const CMD_WRITE_BLOCK_PROTECT: u8 = 0x42;
pub const CMD_RESET_ENABLE: u8 = 0x66;
pub const CMD_RESET: u8 = 0x99;
const STATUS_WIP: u32 = 1 << 0;

const BURST_WORDS: usize = SSI_FIFO_DEPTH / 2;
const DRAIN_WORDS: usize = 16;

const BLOCK_PROTECT_ON: [u8; 18] = [
    0x55, 0x55, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff,
];
const BLOCK_PROTECT_OFF: [u8; 18] = [0; 18];

/// Flash chip driven through the SSI controller.
pub struct SsiFlash<'a, T, D> {
    bus: &'a SharedBus<T, D>,
    mm: MmChannel<'a, T, D>,
    chip: &'static FlashChip,
    base: u32,
    fifo: RetryPolicy,
    busy: RetryPolicy,
}

impl<'a, T: RegisterTransport, D: DelayNs> SsiFlash<'a, T, D> {
    /// Reset the chip and bind it to `chip`.
    pub fn new(
        bus: &'a SharedBus<T, D>,
        mm: MmChannel<'a, T, D>,
        chip: &'static FlashChip,
    ) -> Result<Self> {
        let mut flash = Self {
            bus,
            mm,
            chip,
            base: SSI_BASE,
            fifo: RetryPolicy::SSI_FIFO,
            busy: RetryPolicy::FLASH_BUSY,
        };
        flash.init()?;
        Ok(flash)
    }

    /// Reset the chip and pick the part from its JEDEC id.
    pub fn detect(bus: &'a SharedBus<T, D>, mm: MmChannel<'a, T, D>) -> Result<Self> {
        let mut flash = Self::new(bus, mm, &crate::geometry::SST26WF064C)?;
        let jedec = flash.read_jedec_id()?;
        flash.chip = FlashChip::from_jedec(jedec).ok_or(Error::UnknownFlash { jedec })?;
        info!("flash: detected {} (JEDEC 0x{:06x})", flash.chip.name, jedec);
        Ok(flash)
    }

    pub fn with_retry(mut self, fifo: RetryPolicy, busy: RetryPolicy) -> Self {
        self.fifo = fifo;
        self.busy = busy;
        self
    }

    fn reg(&self, offset: u32) -> u32 {
        self.base + offset
    }

    /// Disable the controller, program its mode, then re-enable it.
    fn setup(
        &self,
        bus: &mut BusGuard<'_, T, D>,
        ctrlr0: u32,
        ctrlr1: Option<u32>,
    ) -> Result<()> {
        bus.write(self.reg(SSI_SER), 0)?;
        bus.write(self.reg(SSI_SSIENR), 0)?;
        if let Some(ndf) = ctrlr1 {
            bus.write(self.reg(SSI_CTRLR1), ndf)?;
        }
        bus.write(self.reg(SSI_CTRLR0), ctrlr0)?;
        bus.write(self.reg(SSI_SSIENR), 1)?;
        Ok(())
    }

    fn wait_tx_empty(&self, bus: &mut BusGuard<'_, T, D>, op: &'static str, addr: u32) -> Result<()> {
        let reg = self.reg(SSI_TXFLR);
        if bus.poll(&self.fifo, |t| Ok(t.read_word(reg)? == 0))? {
            Ok(())
        } else {
            Err(Error::FlashTimeout {
                operation: op,
                addr,
            })
        }
    }

    fn wait_rx_level(
        &self,
        bus: &mut BusGuard<'_, T, D>,
        level: u32,
        op: &'static str,
        addr: u32,
    ) -> Result<()> {
        let reg = self.reg(SSI_RXFLR);
        if bus.poll(&self.fifo, |t| Ok(t.read_word(reg)? >= level))? {
            Ok(())
        } else {
            Err(Error::FlashTimeout {
                operation: op,
                addr,
            })
        }
    }

    fn wait_idle(&self, bus: &mut BusGuard<'_, T, D>, op: &'static str) -> Result<()> {
        let reg = self.reg(SSI_SR);
        let idle = bus.poll(&self.fifo, |t| {
            let sr = t.read_word(reg)?;
            Ok(sr & SR_TFE != 0 && sr & SR_BUSY == 0)
        })?;
        if idle {
            Ok(())
        } else {
            Err(Error::FlashTimeout {
                operation: op,
                addr: 0,
            })
        }
    }

    fn init(&mut self) -> Result<()> {
        let mut bus = self.bus.lock()?;
        bus.read(self.reg(SSI_ICR))?;
        bus.write(self.reg(SSI_SSIENR), 0)?;
        bus.write(self.reg(SSI_BAUDR), BAUDR_SCKDV)?;
        bus.write(self.reg(SSI_CTRLR0), CTRLR0_TX_32)?;
        bus.write(self.reg(SSI_CTRLR1), 0)?;
        bus.write(self.reg(SSI_SPI_CTRLR0), SPI_CTRLR0_INST_L8)?;
        bus.write(self.reg(SSI_SER), 1)?;
        bus.write(self.reg(SSI_SSIENR), 1)?;

        bus.write(self.reg(SSI_DR), u32::from(CMD_RESET_ENABLE))?;
        self.wait_idle(&mut bus, "reset enable")?;
        bus.write(self.reg(SSI_DR), u32::from(CMD_RESET))?;
        self.wait_idle(&mut bus, "reset")?;
        debug!("flash: controller initialised");
        Ok(())
    }

    pub fn read_jedec_id(&mut self) -> Result<u32> {
        {
            let mut bus = self.bus.lock()?;
            bus.write(self.reg(SSI_SER), 0)?;
            bus.write(self.reg(SSI_SSIENR), 0)?;
            bus.write(self.reg(SSI_CTRLR0), CTRLR0_RD_8)?;
            // Three data frames.
            bus.write(self.reg(SSI_CTRLR1), 2)?;
            bus.write(self.reg(SSI_SSIENR), 1)?;
            bus.write(self.reg(SSI_DR), u32::from(CMD_READ_JEDEC))?;
            bus.write(self.reg(SSI_SER), 1)?;
            self.wait_rx_level(&mut bus, 3, "read jedec", 0)?;
        }
        let id = self.mm.csr_read(self.reg(SSI_DR), 3)?;
        Ok(((id[0] & 0xff) << 16) | ((id[1] & 0xff) << 8) | (id[2] & 0xff))
    }

    pub fn read_status(&mut self) -> Result<u32> {
        let mut bus = self.bus.lock()?;
        self.setup(&mut bus, CTRLR0_RD_8, Some(0))?;
        bus.write(self.reg(SSI_DR), u32::from(CMD_READ_STATUS))?;
        bus.write(self.reg(SSI_SER), 1)?;
        self.wait_rx_level(&mut bus, 1, "read status", 0)?;
        let status = bus.read(self.reg(SSI_DR))? & 0xff;
        bus.read(self.reg(SSI_ICR))?;
        Ok(status)
    }

    fn wait_ready(&mut self, op: &'static str, addr: u32) -> Result<()> {
        for _ in 0..self.busy.max_attempts {
            if self.read_status()? & STATUS_WIP == 0 {
                return Ok(());
            }
            self.bus.lock()?.delay_us(self.busy.interval_us);
        }
        Err(Error::FlashTimeout {
            operation: op,
            addr,
        })
    }

    fn write_enable(&mut self) -> Result<()> {
        let mut bus = self.bus.lock()?;
        self.setup(&mut bus, CTRLR0_TX_8, None)?;
        bus.write(self.reg(SSI_DR), u32::from(CMD_WRITE_ENABLE))?;
        bus.write(self.reg(SSI_SER), 1)?;
        self.wait_tx_empty(&mut bus, "write enable", 0)
    }

    /// Send `words` as one chip-select frame, 32-bit framed.
    fn send_frame(&mut self, words: &[u32], op: &'static str, addr: u32) -> Result<()> {
        let mut bus = self.bus.lock()?;
        self.setup(&mut bus, CTRLR0_TX_32, Some(0))?;
        for word in words {
            bus.write(self.reg(SSI_DR), *word)?;
        }
        bus.write(self.reg(SSI_SER), 1)?;
        self.wait_tx_empty(&mut bus, op, addr)
    }

    /// Read one FIFO frame of `words.len()` words starting at `addr`.
    fn read_frame(&mut self, addr: u32, words: &mut [u32]) -> Result<()> {
        let n = words.len();
        {
            let mut bus = self.bus.lock()?;
            self.setup(&mut bus, CTRLR0_RD_32, Some(n as u32 - 1))?;
            bus.write(self.reg(SSI_DR), (u32::from(CMD_READ) << 24) | addr)?;
            bus.write(self.reg(SSI_SER), 1)?;
            self.wait_tx_empty(&mut bus, "read", addr)?;
            self.wait_rx_level(&mut bus, n as u32, "read", addr)?;
        }
        for chunk in words.chunks_mut(DRAIN_WORDS) {
            let data = self.mm.csr_read(self.reg(SSI_DR), chunk.len())?;
            chunk.copy_from_slice(&data);
        }
        Ok(())
    }
}

impl<T: RegisterTransport, D: DelayNs> NorFlash for SsiFlash<'_, T, D> {
    fn chip(&self) -> &'static FlashChip {
        self.chip
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        check_range(addr, buf.len(), self.chip.size)?;
        if buf.is_empty() {
            return Ok(());
        }
        let first = addr & !3;
        let last = (addr + buf.len() as u32).next_multiple_of(4);
        let mut bytes = Vec::with_capacity((last - first) as usize);
        let mut frame = [0u32; SSI_FIFO_DEPTH];
        let mut cursor = first;
        while cursor < last {
            let n = (((last - cursor) / 4) as usize).min(SSI_FIFO_DEPTH);
            self.read_frame(cursor, &mut frame[..n])?;
            for word in &frame[..n] {
                bytes.extend_from_slice(&word.to_be_bytes());
            }
            cursor += (n * 4) as u32;
        }
        let skip = (addr - first) as usize;
        buf.copy_from_slice(&bytes[skip..skip + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, op: &EraseOp) -> Result<()> {
        if op.is_chip() {
            return self.bulk_erase();
        }
        debug!("flash: erase 0x{:02x} at 0x{:06x}", op.opcode, op.addr);
        self.write_enable()?;
        self.send_frame(&[(u32::from(op.opcode) << 24) | op.addr], "erase", op.addr)?;
        self.wait_ready("erase", op.addr)
    }

    fn bulk_erase(&mut self) -> Result<()> {
        info!("flash: bulk erase");
        self.write_enable()?;
        {
            let mut bus = self.bus.lock()?;
            self.setup(&mut bus, CTRLR0_TX_8, Some(0))?;
            bus.write(self.reg(SSI_DR), u32::from(crate::geometry::OP_CHIP_ERASE))?;
            bus.write(self.reg(SSI_SER), 1)?;
            self.wait_tx_empty(&mut bus, "bulk erase", 0)?;
        }
        self.wait_ready("bulk erase", 0)
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let page = self.chip.page_size;
        if data.is_empty() {
            return Ok(());
        }
        if addr % 4 != 0 || addr / page != (addr + data.len() as u32 - 1) / page {
            return Err(Error::Geometry {
                start: addr,
                end: addr + data.len() as u32,
                size: self.chip.size,
            });
        }
        check_range(addr, data.len(), self.chip.size)?;

        // Tail padding with 0xFF leaves those bytes untouched.
        let mut words = Vec::with_capacity(data.len().div_ceil(4));
        for chunk in data.chunks(4) {
            let mut word = [0xff; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            words.push(u32::from_be_bytes(word));
        }

        let mut cursor = addr;
        for burst in words.chunks(BURST_WORDS) {
            let mut frame = heapless::Vec::<u32, { BURST_WORDS + 1 }>::new();
            let _ = frame.push((u32::from(CMD_PAGE_PROGRAM) << 24) | cursor);
            let _ = frame.extend_from_slice(burst);
            self.write_enable()?;
            self.send_frame(&frame, "program", cursor)?;
            self.wait_ready("program", cursor)?;
            cursor += (burst.len() * 4) as u32;
        }
        Ok(())
    }

    fn set_block_protect(&mut self, enabled: bool) -> Result<()> {
        if !self.chip.block_protect {
            return Ok(());
        }
        debug!("flash: block protect {}", if enabled { "on" } else { "off" });
        let pattern = if enabled {
            &BLOCK_PROTECT_ON
        } else {
            &BLOCK_PROTECT_OFF
        };
        self.write_enable()?;
        {
            let mut bus = self.bus.lock()?;
            self.setup(&mut bus, CTRLR0_TX_8, Some(0))?;
            bus.write(self.reg(SSI_DR), u32::from(CMD_WRITE_BLOCK_PROTECT))?;
            for byte in pattern {
                bus.write(self.reg(SSI_DR), u32::from(*byte))?;
            }
            bus.write(self.reg(SSI_SER), 1)?;
            self.wait_tx_empty(&mut bus, "block protect", 0)?;
        }
        self.wait_ready("block protect", 0)
    }
}

/// Live flash as a [`FlashImage`], read through a small window.
///
/// Block scans read one word at a time; the window turns them into
/// kilobyte-sized flash reads. [`LiveFlash::invalidate`] drops the window
/// and must be called whenever the chip may have been written.
pub struct LiveFlash<F> {
    flash: F,
    window: Vec<u8>,
    window_addr: u32,
    window_len: usize,
}

pub const LIVE_WINDOW_SIZE: usize = 1024;

impl<F: NorFlash> LiveFlash<F> {
    pub fn new(flash: F) -> Self {
        Self {
            flash,
            window: alloc::vec![0; LIVE_WINDOW_SIZE],
            window_addr: 0,
            window_len: 0,
        }
    }

    pub fn invalidate(&mut self) {
        self.window_len = 0;
    }

    pub fn flash(&mut self) -> &mut F {
        self.invalidate();
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn cached(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let start = addr.checked_sub(self.window_addr)? as usize;
        (start + len <= self.window_len).then(|| &self.window[start..start + len])
    }
}

impl<F: NorFlash> FlashImage for LiveFlash<F> {
    fn size(&self) -> u32 {
        self.flash.chip().size
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        if buf.len() > LIVE_WINDOW_SIZE / 2 {
            return self.flash.read(addr, buf);
        }
        if let Some(hit) = self.cached(addr, buf.len()) {
            buf.copy_from_slice(hit);
            return Ok(());
        }
        check_range(addr, buf.len(), self.size())?;
        let start = addr & !3;
        let len = LIVE_WINDOW_SIZE.min((self.size() - start) as usize);
        self.flash.read(start, &mut self.window[..len])?;
        self.window_addr = start;
        self.window_len = len;
        match self.cached(addr, buf.len()) {
            Some(hit) => {
                buf.copy_from_slice(hit);
                Ok(())
            }
            None => self.flash.read(addr, buf),
        }
    }
}
