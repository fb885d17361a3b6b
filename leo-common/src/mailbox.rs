// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Doorbell-driven command/response mailboxes.
//!
//! The device exposes two mailboxes with the same handshake:
//!   1. wait for the doorbell to be clear
//!   2. write the input payload
//!   3. write the command word (and ring the doorbell)
//!   4. wait for the device to clear the doorbell
//!   5. read and check the status
//!   6. read the output payload
//!
//! Only the register addresses and the command/status encodings differ, so
//! they are described by a [`MailboxLayout`] and driven by one
//! [`MailboxChannel`].

use embedded_hal::delay::DelayNs;
use log::debug;

use crate::error::MailboxError;
use crate::protocol::{
    Command, CommandResult, MmOpcode, Payload, RetryPolicy, FW_CRC_VERIFY_MARKER, MM_ADDR_OFFSET,
    MM_CMD_OFFSET, MM_DATA_OFFSET, MM_DOORBELL_BIT, MM_LENGTH_SHIFT, MM_MAILBOX_BASE,
    MM_MAX_PAYLOAD_WORDS, MM_STATUS_MASK, MM_STATUS_OFFSET, MM_STATUS_SHIFT, PMBOX_BASE,
    PMBOX_CMD_OFFSET, PMBOX_CTL_OFFSET, PMBOX_DOORBELL_BIT, PMBOX_LENGTH_SHIFT,
    PMBOX_MAX_PAYLOAD_WORDS, PMBOX_PAYLOAD_OFFSET, PMBOX_STATUS_MASK, PMBOX_STS_OFFSET,
};
use crate::transport::{BusGuard, RegisterTransport, SharedBus};

/// Register addresses and encodings of one mailbox.
pub trait MailboxLayout {
    fn max_payload_words(&self) -> usize;

    /// Register holding the doorbell and the doorbell bit mask.
    fn doorbell(&self) -> (u32, u32);

    fn payload_base(&self) -> u32;

    /// Register receiving [`Command::address`], if the layout has one.
    fn address_register(&self) -> Option<u32>;

    fn command_register(&self) -> u32;

    fn command_word(&self, cmd: &Command) -> u32;

    /// Separate write that rings the doorbell after the command word.
    fn ring(&self) -> Option<(u32, u32)>;

    fn status_register(&self) -> u32;

    fn decode_status(&self, raw: u32) -> u32;
}

/// Internal firmware mailbox. The doorbell is part of the command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmLayout {
    pub base: u32,
}

impl MmLayout {
    pub const fn new(base: u32) -> Self {
        Self { base }
    }
}

impl Default for MmLayout {
    fn default() -> Self {
        Self::new(MM_MAILBOX_BASE)
    }
}

impl MailboxLayout for MmLayout {
    fn max_payload_words(&self) -> usize {
        MM_MAX_PAYLOAD_WORDS
    }

    fn doorbell(&self) -> (u32, u32) {
        (self.base + MM_CMD_OFFSET, MM_DOORBELL_BIT)
    }

    fn payload_base(&self) -> u32 {
        self.base + MM_DATA_OFFSET
    }

    fn address_register(&self) -> Option<u32> {
        Some(self.base + MM_ADDR_OFFSET)
    }

    fn command_register(&self) -> u32 {
        self.base + MM_CMD_OFFSET
    }

    fn command_word(&self, cmd: &Command) -> u32 {
        // Length is the input size, or the requested output size for reads.
        let len = if cmd.input.is_empty() {
            cmd.expected_output_len
        } else {
            cmd.input.len()
        };
        u32::from(cmd.opcode) | ((len as u32) << MM_LENGTH_SHIFT) | MM_DOORBELL_BIT
    }

    fn ring(&self) -> Option<(u32, u32)> {
        None
    }

    fn status_register(&self) -> u32 {
        self.base + MM_STATUS_OFFSET
    }

    fn decode_status(&self, raw: u32) -> u32 {
        (raw >> MM_STATUS_SHIFT) & MM_STATUS_MASK
    }
}

/// CXL primary mailbox with a separate control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmboxLayout {
    pub base: u32,
}

impl PmboxLayout {
    pub const fn new(base: u32) -> Self {
        Self { base }
    }
}

impl Default for PmboxLayout {
    fn default() -> Self {
        Self::new(PMBOX_BASE)
    }
}

impl MailboxLayout for PmboxLayout {
    fn max_payload_words(&self) -> usize {
        PMBOX_MAX_PAYLOAD_WORDS
    }

    fn doorbell(&self) -> (u32, u32) {
        (self.base + PMBOX_CTL_OFFSET, PMBOX_DOORBELL_BIT)
    }

    fn payload_base(&self) -> u32 {
        self.base + PMBOX_PAYLOAD_OFFSET
    }

    fn address_register(&self) -> Option<u32> {
        None
    }

    fn command_register(&self) -> u32 {
        self.base + PMBOX_CMD_OFFSET
    }

    fn command_word(&self, cmd: &Command) -> u32 {
        // Payload length is in bytes here.
        u32::from(cmd.opcode) | ((cmd.input_byte_len() as u32) << PMBOX_LENGTH_SHIFT)
    }

    fn ring(&self) -> Option<(u32, u32)> {
        Some((self.base + PMBOX_CTL_OFFSET, PMBOX_DOORBELL_BIT))
    }

    fn status_register(&self) -> u32 {
        // Return code lives in the upper dword of the 64-bit status register.
        self.base + PMBOX_STS_OFFSET + 4
    }

    fn decode_status(&self, raw: u32) -> u32 {
        raw & PMBOX_STATUS_MASK
    }
}

/// One mailbox bound to a shared bus.
pub struct MailboxChannel<'a, T, D, L> {
    bus: &'a SharedBus<T, D>,
    layout: L,
    retry: RetryPolicy,
}

pub type MmChannel<'a, T, D> = MailboxChannel<'a, T, D, MmLayout>;
pub type PmboxChannel<'a, T, D> = MailboxChannel<'a, T, D, PmboxLayout>;

impl<'a, T, D, L> MailboxChannel<'a, T, D, L>
where
    T: RegisterTransport,
    D: DelayNs,
    L: MailboxLayout,
{
    pub fn new(bus: &'a SharedBus<T, D>, layout: L, retry: RetryPolicy) -> Self {
        Self { bus, layout, retry }
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    pub fn bus(&self) -> &'a SharedBus<T, D> {
        self.bus
    }

    /// Run one command to completion.
    ///
    /// Fails with `Busy` while another transaction holds the bus, `Timeout`
    /// when the doorbell does not clear within the retry budget and `Device`
    /// for a non-zero status. No payload is returned in either failure case.
    pub fn execute(&self, cmd: &Command) -> Result<CommandResult, MailboxError> {
        let max = self.layout.max_payload_words();
        if cmd.input.len() > max {
            return Err(MailboxError::PayloadTooLarge {
                len: cmd.input.len(),
                max,
            });
        }
        if cmd.expected_output_len > max {
            return Err(MailboxError::PayloadTooLarge {
                len: cmd.expected_output_len,
                max,
            });
        }

        let mut bus = self.bus.lock()?;
        debug!(
            "mailbox: opcode 0x{:04x} addr 0x{:08x} in {} out {}",
            cmd.opcode,
            cmd.address,
            cmd.input.len(),
            cmd.expected_output_len
        );

        self.wait_doorbell_clear(&mut bus)?;

        let payload = self.layout.payload_base();
        for (i, word) in cmd.input.iter().enumerate() {
            bus.write(payload + (i as u32) * 4, *word)?;
        }
        if let Some(reg) = self.layout.address_register() {
            bus.write(reg, cmd.address)?;
        }
        bus.write(self.layout.command_register(), self.layout.command_word(cmd))?;
        if let Some((reg, value)) = self.layout.ring() {
            bus.write(reg, value)?;
        }

        self.wait_doorbell_clear(&mut bus)?;

        let raw = bus.read(self.layout.status_register())?;
        let status = self.layout.decode_status(raw);
        if status != 0 {
            debug!("mailbox: opcode 0x{:04x} status 0x{:x}", cmd.opcode, status);
            return Err(MailboxError::Device {
                opcode: cmd.opcode,
                status,
            });
        }

        let mut output = Payload::new();
        for i in 0..cmd.expected_output_len {
            let word = bus.read(payload + (i as u32) * 4)?;
            // Bounded by the size check above.
            let _ = output.push(word);
        }

        Ok(CommandResult { status, output })
    }

    fn wait_doorbell_clear(&self, bus: &mut BusGuard<'_, T, D>) -> Result<(), MailboxError> {
        let (reg, mask) = self.layout.doorbell();
        let clear = bus.poll(&self.retry, |t| Ok(t.read_word(reg)? & mask == 0))?;
        if clear {
            Ok(())
        } else {
            Err(MailboxError::Timeout {
                register: reg,
                attempts: self.retry.max_attempts,
            })
        }
    }
}

impl<'a, T: RegisterTransport, D: DelayNs> MailboxChannel<'a, T, D, MmLayout> {
    pub fn mm(bus: &'a SharedBus<T, D>, base: u32, retry: RetryPolicy) -> Self {
        Self::new(bus, MmLayout::new(base), retry)
    }

    /// Read `count` consecutive CSR words through the firmware.
    pub fn csr_read(&self, addr: u32, count: usize) -> Result<Payload, MailboxError> {
        let cmd = Command::mm(MmOpcode::CsrRead)
            .with_address(addr)
            .expecting(count);
        Ok(self.execute(&cmd)?.output)
    }

    pub fn csr_write(&self, addr: u32, words: &[u32]) -> Result<(), MailboxError> {
        let cmd = Command::mm(MmOpcode::CsrWrite)
            .with_address(addr)
            .with_input(words)?;
        self.execute(&cmd).map(|_| ())
    }

    pub fn ping(&self) -> Result<(), MailboxError> {
        self.execute(&Command::mm(MmOpcode::Ping)).map(|_| ())
    }

    /// Ask the firmware to CRC `len_words` words of flash starting at `start`.
    ///
    /// Returns the raw response: status, computed CRC, reserved, marker.
    pub fn fw_crc_verify(
        &self,
        start: u32,
        len_words: u32,
        expected_crc: u32,
    ) -> Result<[u32; 4], MailboxError> {
        let cmd = Command::mm(MmOpcode::FwCrcVerify)
            .with_input(&[start, len_words, expected_crc])?
            .expecting(4);
        let out = self.execute(&cmd)?.output;
        Ok([out[0], out[1], out[2], out[3]])
    }
}

/// True when a FW_CRC_VERIFY response reports a match for `expected_crc`.
pub fn crc_response_ok(response: &[u32; 4], expected_crc: u32) -> bool {
    response[0] == 0
        && response[1] == expected_crc
        && response[2] == 0
        && response[3] == FW_CRC_VERIFY_MARKER
}

impl<'a, T: RegisterTransport, D: DelayNs> MailboxChannel<'a, T, D, PmboxLayout> {
    pub fn pmbox(bus: &'a SharedBus<T, D>, retry: RetryPolicy) -> Self {
        Self::new(bus, PmboxLayout::default(), retry)
    }

    /// Output payload length, in bytes, reported for the last command.
    pub fn output_len_bytes(&self) -> Result<u32, MailboxError> {
        let mut bus = self.bus.lock()?;
        let cmd = self.layout.command_register();
        let low = bus.read(cmd)? >> 16;
        let high = bus.read(cmd + 4)? & 0x1f;
        Ok(low | (high << 16))
    }
}
