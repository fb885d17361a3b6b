// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Register maps, opcodes and wire constants for the Leo side-channel.

use core::fmt;

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

// Flash container format.
// All multi-byte fields are big-endian words in flash and in `.mem` images.

/// Header pattern, present twice at the start of every block.
pub const BLOCK_HEADER_WORD: u32 = 0x5AA5_5AA5;
/// Footer pattern, present twice at the end of every block.
pub const BLOCK_FOOTER_WORD: u32 = 0xAA55_AA55;
/// Fixed header size (nine words); the payload starts here.
pub const BLOCK_HEADER_SIZE: u32 = 0x24;
/// CRC word followed by the two footer words.
pub const BLOCK_TRAILER_SIZE: u32 = 12;
/// First byte covered by the block CRC (right after the header pattern).
pub const BLOCK_CRC_START: u32 = 8;
/// Default bound, in words, of the forward footer scan.
pub const FOOTER_SCAN_LIMIT_WORDS: u32 = 0x200;

/// TOC layout revision understood by the incremental updater.
pub const TOC_FORMAT_VERSION: u32 = 1;
/// Number of code and syscfg slots in the TOC.
pub const TOC_SLOT_COUNT: usize = 3;

// SPI NOR flash
pub const SPI_FLASH_SIZE: u32 = 8 * 1024 * 1024;
pub const FLASH_PAGE_SIZE: u32 = 256;
pub const FLASH_SUBSECTOR_SIZE: u32 = 0x1000;
/// Old images keep persistent data behind the first 128K.
pub const LEGACY_PERSISTENT_DATA_ADDR: u32 = 0x2_0000;

/// Block types found in the flash container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Main,
    SystemConfig,
    PersistentData,
    Description,
    Toc,
    FlashCtrl,
    FlashReserved,
    End,
    Other(u8),
}

impl BlockType {
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0x01 => Self::Main,
            0x04 => Self::SystemConfig,
            0x06 => Self::PersistentData,
            0x07 => Self::Description,
            0x86 => Self::Toc,
            0x87 => Self::FlashCtrl,
            0xdd => Self::FlashReserved,
            0xff => Self::End,
            other => Self::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Main => 0x01,
            Self::SystemConfig => 0x04,
            Self::PersistentData => 0x06,
            Self::Description => 0x07,
            Self::Toc => 0x86,
            Self::FlashCtrl => 0x87,
            Self::FlashReserved => 0xdd,
            Self::End => 0xff,
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("MAIN"),
            Self::SystemConfig => f.write_str("SYSTEM_CONFIG"),
            Self::PersistentData => f.write_str("PERSISTENT_DATA"),
            Self::Description => f.write_str("DESCRIPTION"),
            Self::Toc => f.write_str("TOC"),
            Self::FlashCtrl => f.write_str("FLASH_CTRL"),
            Self::FlashReserved => f.write_str("FLASH_RSVD"),
            Self::End => f.write_str("END"),
            Self::Other(raw) => write!(f, "0x{:02x}", raw),
        }
    }
}

// Internal MM mailbox.
// The register window base is configurable; these are the defaults.

pub const MM_MAILBOX_BASE: u32 = 0x0008_0100;
pub const MM_ADDR_OFFSET: u32 = 0x00;
pub const MM_CMD_OFFSET: u32 = 0x04;
pub const MM_STATUS_OFFSET: u32 = 0x08;
pub const MM_DATA_OFFSET: u32 = 0x10;
pub const MM_MAX_PAYLOAD_WORDS: usize = 16;
pub const MM_DOORBELL_BIT: u32 = 1 << 16;
pub const MM_LENGTH_SHIFT: u32 = 24;
pub const MM_STATUS_SHIFT: u32 = 24;
pub const MM_STATUS_MASK: u32 = 0xf;

/// Fixed marker returned as the last word of a successful FW_CRC_VERIFY.
pub const FW_CRC_VERIFY_MARKER: u32 = 0x5050_a0a0;

/// Opcodes handled by the device firmware through the MM mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum MmOpcode {
    CsrRead = 0x01,
    CsrWrite = 0x11,
    Ping = 0x16,
    FwTests = 0x17,
    FwCrcVerify = 0x21,
    CheckDimmTsod = 0x23,
    CheckDimmSpdInfo = 0x24,
    DumpDimmSpd = 0x25,
    CheckEepromLeoId = 0x26,
    CheckPersistentData = 0x27,
    GetDdrPhyTrainingMargin = 0x28,
    ReadEeprom = 0x29,
    GetLeoErrInfo = 0x31,
}

// CXL primary mailbox (PMBOX), BAR2 relative.

pub const PMBOX_BASE: u32 = 0x0101_2000;
pub const PMBOX_CAP_OFFSET: u32 = 0x00;
pub const PMBOX_CTL_OFFSET: u32 = 0x04;
pub const PMBOX_CMD_OFFSET: u32 = 0x08;
pub const PMBOX_STS_OFFSET: u32 = 0x10;
pub const PMBOX_BCS_OFFSET: u32 = 0x18;
pub const PMBOX_PAYLOAD_OFFSET: u32 = 0x20;
pub const PMBOX_PAYLOAD_SIZE: usize = 256;
pub const PMBOX_MAX_PAYLOAD_WORDS: usize = PMBOX_PAYLOAD_SIZE / 4;
pub const PMBOX_DOORBELL_BIT: u32 = 1;
pub const PMBOX_LENGTH_SHIFT: u32 = 16;
pub const PMBOX_STATUS_MASK: u32 = 0xffff;

/// CXL mailbox opcodes used against the PMBOX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum PmboxOpcode {
    GetEventRecords = 0x0100,
    ClearEventRecords = 0x0101,
    GetEventInterruptPolicy = 0x0102,
    SetEventInterruptPolicy = 0x0103,
    GetAlertConfig = 0x4201,
    SetAlertConfig = 0x4202,
    GetPoisonList = 0x4300,
    InjectPoison = 0x4301,
    ClearPoison = 0x4302,
}

// Device identification registers

/// Firmware version, build number and boot status words.
pub const FW_INFO_REGS: [u32; 3] = [0x8_0180, 0x8_0184, 0x8_0188];
/// LEO_MISC register; its low byte identifies the ASIC revision.
pub const LEO_MISC_REG: u32 = 0x0010_0000;
pub const ASIC_A0_MARKER: u32 = 0xa0;

/// Silicon revision, used to refuse images built for the other stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsicRevision {
    A0,
    D5,
}

impl AsicRevision {
    /// Decode the marker stored in a DESCRIPTION block entry.
    pub const fn from_image_marker(marker: u32) -> Self {
        if marker == ASIC_A0_MARKER {
            Self::A0
        } else {
            Self::D5
        }
    }

    /// Decode the LEO_MISC register value.
    pub const fn from_misc_register(value: u32) -> Self {
        if value & 0xff == ASIC_A0_MARKER {
            Self::A0
        } else {
            Self::D5
        }
    }
}

impl fmt::Display for AsicRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A0 => f.write_str("A0"),
            Self::D5 => f.write_str("D5"),
        }
    }
}

/// Running firmware version as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u32,
}

impl FirmwareVersion {
    pub const fn from_registers(version: u32, build: u32) -> Self {
        Self {
            major: ((version >> 8) & 0xff) as u8,
            minor: (version & 0xff) as u8,
            build,
        }
    }
}

// Mailbox transactions

/// Largest payload any mailbox layout accepts.
pub const MAX_PAYLOAD_WORDS: usize = PMBOX_MAX_PAYLOAD_WORDS;
pub type Payload = Vec<u32, MAX_PAYLOAD_WORDS>;

/// One mailbox request. Built by the caller, never modified once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub opcode: u16,
    /// Target address for CSR style commands; ignored by layouts without an address register.
    pub address: u32,
    pub input: Payload,
    /// Exact input size in bytes when it is not a whole number of words.
    pub byte_len: Option<usize>,
    pub expected_output_len: usize,
}

impl Command {
    pub fn new(opcode: u16) -> Self {
        Self {
            opcode,
            address: 0,
            input: Vec::new(),
            byte_len: None,
            expected_output_len: 0,
        }
    }

    pub fn mm(opcode: MmOpcode) -> Self {
        Self::new(opcode as u16)
    }

    pub fn pmbox(opcode: PmboxOpcode) -> Self {
        Self::new(opcode as u16)
    }

    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    pub fn with_input(mut self, words: &[u32]) -> Result<Self, MailboxError> {
        self.input = Vec::from_slice(words).map_err(|_| MailboxError::PayloadTooLarge {
            len: words.len(),
            max: MAX_PAYLOAD_WORDS,
        })?;
        Ok(self)
    }

    /// Pack `bytes` little-endian into payload words, keeping the exact length.
    pub fn with_input_bytes(mut self, bytes: &[u8]) -> Result<Self, MailboxError> {
        let words = bytes.len().div_ceil(4);
        if words > MAX_PAYLOAD_WORDS {
            return Err(MailboxError::PayloadTooLarge {
                len: words,
                max: MAX_PAYLOAD_WORDS,
            });
        }
        self.input.clear();
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            let _ = self.input.push(u32::from_le_bytes(word));
        }
        self.byte_len = Some(bytes.len());
        Ok(self)
    }

    pub fn input_byte_len(&self) -> usize {
        self.byte_len.unwrap_or(self.input.len() * 4)
    }

    pub fn expecting(mut self, words: usize) -> Self {
        self.expected_output_len = words;
        self
    }
}

/// Completed transaction. Only produced for a zero device status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: u32,
    pub output: Payload,
}

/// Bounded polling budget: `max_attempts` probes separated by `interval_us`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval_us: u32,
}

impl RetryPolicy {
    /// CXL PMBOX doorbell: ten probes, 100 us apart.
    pub const PMBOX: Self = Self::new(10, 100);
    /// MM mailbox doorbell.
    pub const MM_MAILBOX: Self = Self::new(10_000, 100);
    /// SSI FIFO level polling.
    pub const SSI_FIFO: Self = Self::new(0x100, 0);
    /// Flash write-in-progress polling; long enough for a full chip erase.
    pub const FLASH_BUSY: Self = Self::new(1_000_000, 100);

    pub const fn new(max_attempts: u32, interval_us: u32) -> Self {
        Self {
            max_attempts,
            interval_us,
        }
    }

    /// Total time the policy may sleep, in microseconds.
    pub const fn budget_us(&self) -> u64 {
        self.max_attempts as u64 * self.interval_us as u64
    }
}
