// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Progress reporting hooks for long flash operations.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Erase,
    Write,
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => f.write_str("erase"),
            Self::Write => f.write_str("write"),
            Self::Verify => f.write_str("verify"),
        }
    }
}

/// Receives phase starts and advances. Units are bytes for erase and write,
/// blocks for verify.
pub trait Progress {
    fn start(&mut self, _phase: Phase, _total: u64) {}
    fn advance(&mut self, _amount: u64) {}
    fn finish(&mut self, _phase: Phase) {}
}

/// Discards all progress.
pub struct NoProgress;

impl Progress for NoProgress {}
