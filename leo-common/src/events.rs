// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Typed CXL PMBOX commands: event logs and the poison list.
//!
//! Output payloads are packed little-endian structures; they are decoded
//! once into owned types here so callers never touch raw offsets.

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;
use crate::mailbox::MailboxChannel;
use crate::mailbox::PmboxLayout;
use crate::protocol::{Command, PmboxOpcode, PMBOX_MAX_PAYLOAD_WORDS};
use crate::transport::RegisterTransport;

/// `601dcbb3-9c06-4eab-b8af-4e9bfb5c9624`
pub const DRAM_EVENT_UUID: [u8; 16] = [
    0x60, 0x1d, 0xcb, 0xb3, 0x9c, 0x06, 0x4e, 0xab, 0xb8, 0xaf, 0x4e, 0x9b, 0xfb, 0x5c, 0x96, 0x24,
];

/// `fe927475-dd59-4339-a586-79bab113b774`
pub const MEMORY_MODULE_EVENT_UUID: [u8; 16] = [
    0xfe, 0x92, 0x74, 0x75, 0xdd, 0x59, 0x43, 0x39, 0xa5, 0x86, 0x79, 0xba, 0xb1, 0x13, 0xb7, 0x74,
];

const EVENT_LOG_PAGE_WORDS: usize = 40;
const EVENT_RECORD_OFFSET: usize = 32;
const EVENT_DATA_OFFSET: usize = EVENT_RECORD_OFFSET + 48;
const EVENT_DATA_LEN: usize = 80;
const POISON_RECORD_OFFSET: usize = 32;
const POISON_RECORD_LEN: usize = 16;
const CLEAR_POISON_DATA_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventLog {
    Informational = 0,
    Warning = 1,
    Failure = 2,
    Fatal = 3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogHeader {
    pub overflow: bool,
    pub more_records: bool,
    pub overflow_count: u16,
    pub first_overflow_timestamp: u64,
    pub last_overflow_timestamp: u64,
    pub record_count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecordHeader {
    pub uuid: [u8; 16],
    pub length: u8,
    pub severity: u8,
    pub permanent: bool,
    pub maintenance_needed: bool,
    pub performance_degraded: bool,
    pub replacement_needed: bool,
    pub handle: u16,
    pub related_handle: u16,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DramEvent {
    pub dpa: u64,
    pub uncorrectable: bool,
    pub threshold: bool,
    pub poison_list_overflow: bool,
    pub event_type: u8,
    pub transaction_type: u8,
    pub validity: u16,
    pub channel: u8,
    pub rank: u8,
    pub nibble_mask: u32,
    pub bank_group: u8,
    pub bank: u8,
    pub row: u32,
    pub column: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryModuleEvent {
    pub event_type: u8,
    pub health_status: u8,
    pub media_status: u8,
    pub extra_status: u8,
    pub life_used: u8,
    pub device_temperature: u16,
    pub dirty_shutdown_count: u32,
    pub corrected_volatile_errors: u32,
    pub corrected_persistent_errors: u32,
}

/// Record body, selected by the record UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventRecord {
    Dram(DramEvent),
    MemoryModule(MemoryModuleEvent),
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogPage {
    pub header: EventLogHeader,
    pub record: Option<(EventRecordHeader, EventRecord)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearEvents<'h> {
    All,
    Handles(&'h [u16]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaErrorRecord {
    pub dpa: u64,
    /// Number of adjacent poisoned addresses.
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoisonList {
    pub more_records: bool,
    pub overflow: bool,
    pub scan_in_progress: bool,
    pub overflow_timestamp: u64,
    pub records: Vec<MediaErrorRecord>,
}

fn le16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le24(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], 0])
}

fn le32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le64(b: &[u8], at: usize) -> u64 {
    u64::from(le32(b, at)) | (u64::from(le32(b, at + 4)) << 32)
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn bit(byte: u8, n: u8) -> bool {
    byte & (1 << n) != 0
}

impl DramEvent {
    fn decode(d: &[u8]) -> Self {
        Self {
            dpa: le64(d, 0),
            uncorrectable: bit(d[8], 0),
            threshold: bit(d[8], 1),
            poison_list_overflow: bit(d[8], 2),
            event_type: d[9],
            transaction_type: d[10],
            validity: le16(d, 11),
            channel: d[13],
            rank: d[14],
            nibble_mask: le24(d, 15),
            bank_group: d[18],
            bank: d[19],
            row: le24(d, 20),
            column: le16(d, 23),
        }
    }
}

impl MemoryModuleEvent {
    fn decode(d: &[u8]) -> Self {
        Self {
            event_type: d[0],
            health_status: d[1],
            media_status: d[2],
            extra_status: d[3],
            life_used: d[4],
            device_temperature: le16(d, 5),
            dirty_shutdown_count: le32(d, 7),
            corrected_volatile_errors: le32(d, 11),
            corrected_persistent_errors: le32(d, 15),
        }
    }
}

impl EventRecord {
    pub fn decode(uuid: &[u8; 16], data: &[u8]) -> Self {
        match *uuid {
            DRAM_EVENT_UUID => Self::Dram(DramEvent::decode(data)),
            MEMORY_MODULE_EVENT_UUID => Self::MemoryModule(MemoryModuleEvent::decode(data)),
            _ => Self::Unknown(data.to_vec()),
        }
    }
}

impl EventLogPage {
    /// Decode a Get Event Records output payload (at least 160 bytes).
    pub fn decode(b: &[u8]) -> Self {
        let header = EventLogHeader {
            overflow: bit(b[0], 0),
            more_records: bit(b[0], 1),
            overflow_count: le16(b, 2),
            first_overflow_timestamp: le64(b, 4),
            last_overflow_timestamp: le64(b, 12),
            record_count: le16(b, 20),
        };
        if header.record_count == 0 {
            return Self {
                header,
                record: None,
            };
        }

        let r = &b[EVENT_RECORD_OFFSET..];
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&r[..16]);
        let flags = r[17];
        let record_header = EventRecordHeader {
            uuid,
            length: r[16],
            severity: flags & 0x3,
            permanent: bit(flags, 2),
            maintenance_needed: bit(flags, 3),
            performance_degraded: bit(flags, 4),
            replacement_needed: bit(flags, 5),
            handle: le16(r, 20),
            related_handle: le16(r, 22),
            timestamp: le64(r, 24),
        };
        let data = &b[EVENT_DATA_OFFSET..EVENT_DATA_OFFSET + EVENT_DATA_LEN];
        let body = EventRecord::decode(&uuid, data);
        Self {
            header,
            record: Some((record_header, body)),
        }
    }
}

impl PoisonList {
    pub fn decode(b: &[u8]) -> Self {
        let count = if b.len() >= 12 { le16(b, 10) as usize } else { 0 };
        let fits = b.len().saturating_sub(POISON_RECORD_OFFSET) / POISON_RECORD_LEN;
        let records = (0..count.min(fits))
            .map(|i| {
                let at = POISON_RECORD_OFFSET + i * POISON_RECORD_LEN;
                MediaErrorRecord {
                    dpa: le64(b, at),
                    length: le32(b, at + 8),
                }
            })
            .collect();
        let flags = b.first().copied().unwrap_or(0);
        Self {
            more_records: bit(flags, 0),
            overflow: bit(flags, 1),
            scan_in_progress: bit(flags, 2),
            overflow_timestamp: if b.len() >= 10 { le64(b, 2) } else { 0 },
            records,
        }
    }
}

fn dpa_words(dpa: u64) -> [u32; 2] {
    [dpa as u32, (dpa >> 32) as u32]
}

impl<T: RegisterTransport, D: DelayNs> MailboxChannel<'_, T, D, PmboxLayout> {
    /// Fetch one page of the given event log.
    pub fn get_event_records(&self, log: EventLog) -> Result<EventLogPage, MailboxError> {
        let cmd = Command::pmbox(PmboxOpcode::GetEventRecords)
            .with_input_bytes(&[log as u8])?
            .expecting(EVENT_LOG_PAGE_WORDS);
        let out = self.execute(&cmd)?.output;
        Ok(EventLogPage::decode(&words_to_bytes(&out)))
    }

    /// Drain a log until the device reports no more records.
    pub fn drain_event_log(&self, log: EventLog) -> Result<Vec<EventLogPage>, MailboxError> {
        let mut pages = Vec::new();
        loop {
            let page = self.get_event_records(log)?;
            let more = page.header.more_records && page.header.record_count > 0;
            pages.push(page);
            if !more {
                return Ok(pages);
            }
        }
    }

    pub fn clear_event_records(
        &self,
        log: EventLog,
        which: ClearEvents<'_>,
    ) -> Result<(), MailboxError> {
        let mut input = Vec::with_capacity(6);
        input.push(log as u8);
        match which {
            ClearEvents::All => {
                input.extend_from_slice(&[1, 0, 0, 0, 0]);
            }
            ClearEvents::Handles(handles) => {
                let count = u8::try_from(handles.len()).map_err(|_| {
                    MailboxError::PayloadTooLarge {
                        len: handles.len(),
                        max: u8::MAX as usize,
                    }
                })?;
                input.extend_from_slice(&[0, count, 0, 0, 0]);
                for h in handles {
                    input.extend_from_slice(&h.to_le_bytes());
                }
            }
        }
        let cmd = Command::pmbox(PmboxOpcode::ClearEventRecords).with_input_bytes(&input)?;
        self.execute(&cmd).map(|_| ())
    }

    pub fn get_poison_list(&self, dpa: u64, range: u64) -> Result<PoisonList, MailboxError> {
        let [d0, d1] = dpa_words(dpa);
        let [r0, r1] = dpa_words(range);
        let cmd = Command::pmbox(PmboxOpcode::GetPoisonList)
            .with_input(&[d0, d1, r0, r1])?
            .expecting(PMBOX_MAX_PAYLOAD_WORDS);
        let out = self.execute(&cmd)?.output;
        let len = (self.output_len_bytes()? as usize).min(out.len() * 4);
        let bytes = words_to_bytes(&out);
        Ok(PoisonList::decode(&bytes[..len]))
    }

    pub fn inject_poison(&self, dpa: u64) -> Result<(), MailboxError> {
        let cmd = Command::pmbox(PmboxOpcode::InjectPoison).with_input(&dpa_words(dpa))?;
        self.execute(&cmd).map(|_| ())
    }

    pub fn clear_poison(&self, dpa: u64) -> Result<(), MailboxError> {
        // DPA followed by the 64 bytes written in place of the poisoned line.
        let mut words = [0u32; 2 + CLEAR_POISON_DATA_LEN / 4];
        words[..2].copy_from_slice(&dpa_words(dpa));
        let cmd = Command::pmbox(PmboxOpcode::ClearPoison).with_input(&words)?;
        self.execute(&cmd).map(|_| ())
    }
}
