// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Local block CRC, matching what the device firmware computes.

use crc::{Algorithm, Crc};

use crate::protocol::{BLOCK_CRC_START, BLOCK_TRAILER_SIZE};

/// Reflected CRC-32C with zero init and no final xor.
pub const CRC_32_LEO_BLOCK: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x1edc_6f41,
    init: 0,
    refin: true,
    refout: true,
    xorout: 0,
    check: 0x58e3_fa20,
    residue: 0,
};

pub const BLOCK_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_LEO_BLOCK);

/// CRC over big-endian container words, each fed least-significant byte first.
pub fn crc_words_be(bytes: &[u8]) -> u32 {
    let mut digest = BLOCK_CRC.digest();
    for word in bytes.chunks_exact(4) {
        let value = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        digest.update(&value.to_le_bytes());
    }
    digest.finalize()
}

/// CRC of a whole block as laid out in flash, `block[0]` being the first
/// header word and the block ending with the two footer words.
///
/// Covers everything after the header pattern up to the CRC word.
pub fn block_crc(block: &[u8]) -> u32 {
    let start = BLOCK_CRC_START as usize;
    let end = block.len().saturating_sub(BLOCK_TRAILER_SIZE as usize);
    if end <= start {
        return 0;
    }
    crc_words_be(&block[start..end])
}

/// Stored CRC word of a block laid out as for [`block_crc`].
pub fn stored_crc(block: &[u8]) -> Option<u32> {
    let at = block.len().checked_sub(BLOCK_TRAILER_SIZE as usize)?;
    let word = block.get(at..at + 4)?;
    Some(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}
