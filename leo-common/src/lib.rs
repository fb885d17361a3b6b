// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Mailbox protocol and SPI flash image engine for Leo CXL memory controllers.
//!
//! This crate supports both `no_std` and `std` environments:
//! - Default: `no_std` + `alloc`, register access through [`RegisterTransport`]
//! - `std` feature: `std` support for host tools
//!
//! The update path is split in three: [`FirmwareUpdatePlanner`] turns the
//! current flash and a candidate image into an [`UpdatePlan`],
//! [`FlashProgrammer`] executes it and [`CrcVerifier`] confirms the result
//! through the device firmware.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod block;
pub mod crc;
pub mod error;
pub mod events;
pub mod flash;
pub mod geometry;
pub mod image;
pub mod mailbox;
pub mod planner;
pub mod programmer;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod toc;
pub mod transport;
pub mod verify;

// Re-export commonly used types
pub use block::{Block, BlockCodec, NewBlock, ScanLimits};
pub use error::{Error, FormatError, MailboxError, Result, TransportError};
pub use flash::{LiveFlash, NorFlash, SsiFlash};
pub use geometry::{ChipSelect, EraseOp, FlashChip};
pub use image::{FlashImage, MemImage};
pub use mailbox::{MailboxChannel, MmChannel, PmboxChannel};
pub use planner::{FirmwareUpdatePlanner, PlanMode, PlanOptions, UpdatePlan};
pub use programmer::FlashProgrammer;
pub use progress::{NoProgress, Phase, Progress};
pub use protocol::{AsicRevision, BlockType, Command, CommandResult, FirmwareVersion, RetryPolicy};
pub use session::{SessionConfig, UpdateOptions, UpdateSession};
pub use toc::TableOfContents;
pub use transport::{RegisterTransport, SharedBus};
pub use verify::{BlockVerifier, CrcVerifier, VerifyTarget};
