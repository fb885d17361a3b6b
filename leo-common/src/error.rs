// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Error taxonomy shared by every layer.

use alloc::string::String;

use crate::protocol::{AsicRevision, BlockType};

/// A single register access failed on the underlying link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("register access at 0x{addr:08x} failed: {detail}")]
pub struct TransportError {
    pub addr: u32,
    pub detail: String,
}

impl TransportError {
    pub fn new(addr: u32, detail: impl Into<String>) -> Self {
        Self {
            addr,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    /// Another transaction holds the register bus.
    #[error("mailbox busy: a transaction is already in progress")]
    Busy,

    #[error("doorbell at 0x{register:08x} still set after {attempts} polls")]
    Timeout { register: u32, attempts: u32 },

    #[error("opcode 0x{opcode:04x} failed with device status 0x{status:x}")]
    Device { opcode: u16, status: u32 },

    #[error("payload of {len} words exceeds the {max}-word mailbox window")]
    PayloadTooLarge { len: usize, max: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Malformed or missing flash container data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("no block header at 0x{addr:06x} (found {found0:08x} {found1:08x})")]
    BadHeader { addr: u32, found0: u32, found1: u32 },

    #[error("block at 0x{addr:06x}: length 0x{length:x} != length copy 0x{length_copy:x}")]
    LengthMismatch {
        addr: u32,
        length: u32,
        length_copy: u32,
    },

    #[error("block at 0x{addr:06x}: no footer within {scanned} words")]
    MissingFooter { addr: u32, scanned: u32 },

    #[error("block at 0x{addr:06x}: stored CRC {stored:08x} != computed {computed:08x}")]
    CrcMismatch { addr: u32, stored: u32, computed: u32 },

    #[error("no {block_type} block found")]
    NotFound { block_type: BlockType },

    #[error("no block header found after 0x{from:06x}")]
    NoMoreBlocks { from: u32 },

    #[error("read of {len} bytes at 0x{addr:06x} is outside the {size}-byte image")]
    OutOfBounds { addr: u32, len: usize, size: u32 },

    #[error("TOC format {config0}.{config1} version {version} is not supported")]
    UnsupportedToc {
        config0: u32,
        config1: u32,
        version: u32,
    },

    #[error("block payload of {len} bytes is too short, need {need}")]
    Truncated { len: usize, need: usize },

    #[error("flash TOC format {flash} does not match image TOC format {image}")]
    TocMismatch { flash: u32, image: u32 },

    #[error("slot {slot} is out of range")]
    InvalidSlot { slot: u8 },

    #[error("line {line}: {reason}")]
    BadMemLine { line: usize, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("image is built for ASIC {image}, device reports {device}")]
    Compatibility {
        image: AsicRevision,
        device: AsicRevision,
    },

    #[error(
        "CRC verification failed at 0x{addr:06x}: expected {expected:08x}, device computed {actual:08x} (status {status:x}, marker {marker:08x})"
    )]
    Verification {
        addr: u32,
        expected: u32,
        actual: u32,
        status: u32,
        marker: u32,
    },

    #[error("flash {operation} at 0x{addr:06x} did not complete within the retry budget")]
    FlashTimeout { operation: &'static str, addr: u32 },

    #[error("range 0x{start:06x}..0x{end:06x} is outside the {size}-byte flash")]
    Geometry { start: u32, end: u32, size: u32 },

    #[error("unknown flash JEDEC id 0x{jedec:06x}")]
    UnknownFlash { jedec: u32 },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
