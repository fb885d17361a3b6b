// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Block container scanning and decoding.

mod common;

use common::{block_bytes, build_image, pattern, standard_image, Layout, DESCRIPTION_ADDR, TOC_ADDR};
use leo_common::block::{BlockCodec, NewBlock, ScanLimits};
use leo_common::crc::block_crc;
use leo_common::error::{Error, FormatError};
use leo_common::image::MemImage;
use leo_common::protocol::{BlockType, BLOCK_FOOTER_WORD, BLOCK_HEADER_WORD};

fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn image_with(addr: u32, bytes: &[u8]) -> MemImage {
    let mut image = MemImage::blank(0x1_0000);
    image.write(addr, bytes).unwrap();
    image
}

#[test]
fn test_encode_layout() {
    let mut block = NewBlock::new(BlockType::Main, &[1, 2, 3, 4, 5]);
    block.subtype = 0x22;
    block.version = 3;
    block.address = 0x1000;
    block.config_data = [7, 8];
    let bytes = block.encode();

    // Payload padded to 8 bytes.
    assert_eq!(bytes.len(), 0x24 + 8 + 12);
    assert_eq!(word(&bytes, 0), BLOCK_HEADER_WORD);
    assert_eq!(word(&bytes, 4), BLOCK_HEADER_WORD);
    assert_eq!(word(&bytes, 8), 0x0022_0001);
    assert_eq!(bytes[11], 0x01);
    assert_eq!(word(&bytes, 12), 3);
    assert_eq!(word(&bytes, 16), 8);
    assert_eq!(word(&bytes, 20), 8);
    assert_eq!(word(&bytes, 24), 0x1000);
    assert_eq!(word(&bytes, 28), 7);
    assert_eq!(word(&bytes, 32), 8);
    assert_eq!(&bytes[0x24..0x2c], &[1, 2, 3, 4, 5, 0xff, 0xff, 0xff]);
    let end = bytes.len();
    assert_eq!(word(&bytes, end - 12), block_crc(&bytes));
    assert_eq!(word(&bytes, end - 8), BLOCK_FOOTER_WORD);
    assert_eq!(word(&bytes, end - 4), BLOCK_FOOTER_WORD);
}

#[test]
fn test_get_block_info() {
    let bytes = block_bytes(BlockType::SystemConfig, &pattern(0x40, 3));
    let mut codec = BlockCodec::new(image_with(0x100, &bytes));

    let block = codec.get_block_info(0x100).unwrap();
    assert_eq!(block.block_type, BlockType::SystemConfig);
    assert_eq!(block.length, 0x40);
    assert_eq!(block.length_copy, 0x40);
    assert_eq!(block.start_addr, 0x100);
    assert_eq!(block.end_addr, 0x100 + bytes.len() as u32);
    assert_eq!(block.size(), bytes.len() as u32);
    assert_eq!(block.len_words(), bytes.len() as u32 / 4);
    assert_eq!(block.payload_addr(), 0x124);
    assert_eq!(block.crc, block_crc(&bytes));
    assert_eq!(block.trailer, [BLOCK_FOOTER_WORD; 2]);
}

#[test]
fn test_length_mismatch_is_format_error() {
    let mut bytes = block_bytes(BlockType::Main, &pattern(0x20, 1));
    bytes[20..24].copy_from_slice(&0x24u32.to_be_bytes());
    let mut codec = BlockCodec::new(image_with(0, &bytes));

    let err = codec.get_block_info(0).unwrap_err();
    assert_eq!(
        err,
        Error::Format(FormatError::LengthMismatch {
            addr: 0,
            length: 0x20,
            length_copy: 0x24,
        })
    );
}

#[test]
fn test_bad_header() {
    let mut codec = BlockCodec::new(MemImage::blank(0x1000));
    let err = codec.get_block_size(0x40).unwrap_err();
    assert!(matches!(
        err,
        Error::Format(FormatError::BadHeader {
            addr: 0x40,
            found0: 0xffff_ffff,
            ..
        })
    ));
    assert!(!codec.has_header(0x40).unwrap());
}

#[test]
fn test_footer_scan_is_bounded() {
    let bytes = block_bytes(BlockType::Main, &pattern(0x1000, 5));
    let image = image_with(0, &bytes);

    let mut tight = BlockCodec::with_limits(
        image.clone(),
        ScanLimits {
            footer_scan_words: 4,
        },
    );
    let err = tight.find_block_end(0).unwrap_err();
    assert!(matches!(
        err,
        Error::Format(FormatError::MissingFooter { addr: 0, scanned: 4 })
    ));

    let mut default = BlockCodec::new(image);
    assert_eq!(default.find_block_end(0).unwrap(), bytes.len() as u32);
}

#[test]
fn test_find_next_block_skips() {
    let mut codec = BlockCodec::new(standard_image());

    assert_eq!(codec.find_next_block(0, 0).unwrap(), 0);
    assert_eq!(codec.find_next_block(0, 1).unwrap(), TOC_ADDR);
    assert_eq!(codec.find_next_block(0, 2).unwrap(), DESCRIPTION_ADDR);
    // Starting past a header finds the following one.
    assert_eq!(codec.find_next_block(4, 0).unwrap(), TOC_ADDR);
}

#[test]
fn test_find_next_block_exhausted() {
    let mut codec = BlockCodec::new(MemImage::blank(0x800));
    let err = codec.find_next_block(0, 0).unwrap_err();
    assert_eq!(err, Error::Format(FormatError::NoMoreBlocks { from: 0 }));
}

#[test]
fn test_find_block_by_type() {
    let layout = Layout::default();
    let mut codec = BlockCodec::new(build_image(&layout));

    let toc = codec.find_block_by_type(BlockType::Toc).unwrap();
    assert_eq!(toc.start_addr, TOC_ADDR);
    let syscfg = codec.find_block_by_type(BlockType::SystemConfig).unwrap();
    assert_eq!(syscfg.start_addr, layout.syscfg_addr);

    let err = codec.find_block_by_type(BlockType::FlashReserved).unwrap_err();
    assert_eq!(
        err,
        Error::Format(FormatError::NotFound {
            block_type: BlockType::FlashReserved
        })
    );
}

#[test]
fn test_find_block_by_type_steps_over_broken_persistent_data() {
    let layout = Layout::default();
    let mut image = build_image(&layout);
    let pd = layout.pd_addr.unwrap();
    // Break the length copy of PERSISTENT_DATA.
    image.write(pd + 20, &0x1234u32.to_be_bytes()).unwrap();
    let mut codec = BlockCodec::new(image);

    let main = codec.find_block_by_type(BlockType::Main).unwrap();
    assert_eq!(main.start_addr, layout.code_addr);
}

#[test]
fn test_find_block_by_type_fails_on_other_broken_block() {
    let layout = Layout::default();
    let mut image = build_image(&layout);
    image
        .write(layout.syscfg_addr + 20, &0x1234u32.to_be_bytes())
        .unwrap();
    let mut codec = BlockCodec::new(image);

    let err = codec.find_block_by_type(BlockType::Main).unwrap_err();
    assert!(matches!(
        err,
        Error::Format(FormatError::LengthMismatch { .. })
    ));
}

#[test]
fn test_chain_from_code_ends_with_end() {
    let layout = Layout::default();
    let mut codec = BlockCodec::new(build_image(&layout));

    let chain = codec.chain_from(layout.code_addr).unwrap();
    let types: Vec<_> = chain.iter().map(|b| b.block_type).collect();
    assert_eq!(types, vec![BlockType::Main, BlockType::Main, BlockType::End]);
    assert_eq!(chain[1].start_addr, chain[0].end_addr);
}

#[test]
fn test_blocks_lists_whole_image() {
    let mut codec = BlockCodec::new(standard_image());
    let types: Vec<_> = codec
        .blocks()
        .unwrap()
        .iter()
        .map(|b| b.block_type)
        .collect();
    assert_eq!(
        types,
        vec![
            BlockType::FlashCtrl,
            BlockType::Toc,
            BlockType::Description,
            BlockType::SystemConfig,
            BlockType::PersistentData,
            BlockType::Main,
            BlockType::Main,
            BlockType::End,
        ]
    );
}

#[test]
fn test_find_persistent_data_in_chain() {
    let layout = Layout::default();
    let mut codec = BlockCodec::new(build_image(&layout));
    let pd = codec.find_persistent_data().unwrap();
    assert_eq!(pd.start_addr, layout.pd_addr.unwrap());
    assert_eq!(codec.read_payload(&pd).unwrap(), layout.pd_payload);
}

#[test]
fn test_find_persistent_data_at_legacy_address() {
    let layout = Layout {
        pd_addr: None,
        ..Layout::default()
    };
    let mut image = build_image(&layout);
    let pd = block_bytes(BlockType::PersistentData, &pattern(0x80, 9));
    image.write(0x2_0000, &pd).unwrap();
    image
        .write(0x2_0000 + pd.len() as u32, &block_bytes(BlockType::End, &[]))
        .unwrap();
    let mut codec = BlockCodec::new(image);

    let found = codec.find_persistent_data().unwrap();
    assert_eq!(found.start_addr, 0x2_0000);
    assert_eq!(found.length, 0x80);
}

#[test]
fn test_read_payload_words_big_endian() {
    let bytes = block_bytes(BlockType::Main, &[0x12, 0x34, 0x56, 0x78, 0xaa, 0xbb, 0xcc, 0xdd]);
    let mut codec = BlockCodec::new(image_with(0, &bytes));
    let block = codec.get_block_info(0).unwrap();
    assert_eq!(
        codec.read_payload_words(&block).unwrap(),
        vec![0x1234_5678, 0xaabb_ccdd]
    );
    assert_eq!(codec.read_block(&block).unwrap(), bytes);
}

/// TOC block at 0x100..0x1f8; its two footer words sit at 0x1f0.
fn clear_toc_footer(image: &mut MemImage) {
    image.write(TOC_ADDR + 0xf0, &[0xff; 8]).unwrap();
}

#[test]
fn test_footer_scan_stops_at_next_header() {
    let mut image = standard_image();
    clear_toc_footer(&mut image);
    let mut codec = BlockCodec::new(image);

    let err = codec.find_block_end(TOC_ADDR).unwrap_err();
    assert_eq!(
        err,
        Error::Format(FormatError::MissingFooter {
            addr: TOC_ADDR,
            scanned: 0x200,
        })
    );
    // The following block is unaffected.
    assert_eq!(
        codec.get_block_info(DESCRIPTION_ADDR).unwrap().block_type,
        BlockType::Description
    );
}

#[test]
fn test_empty_block_end_found() {
    let bytes = block_bytes(BlockType::End, &[]);
    let mut codec = BlockCodec::new(image_with(0x200, &bytes));
    assert_eq!(codec.find_block_end(0x200).unwrap(), 0x200 + bytes.len() as u32);
}

#[test]
fn test_find_persistent_data_steps_over_unreadable_block() {
    let layout = Layout::default();
    let mut image = build_image(&layout);
    clear_toc_footer(&mut image);
    let mut codec = BlockCodec::new(image);

    let pd = codec.find_persistent_data().unwrap();
    assert_eq!(pd.start_addr, layout.pd_addr.unwrap());
}

#[test]
fn test_find_persistent_data_stops_at_end() {
    let layout = Layout {
        pd_addr: None,
        ..Layout::default()
    };
    let mut codec = BlockCodec::new(build_image(&layout));

    let err = codec.find_persistent_data().unwrap_err();
    assert_eq!(
        err,
        Error::Format(FormatError::NotFound {
            block_type: BlockType::PersistentData
        })
    );
}

#[test]
fn test_check_crc() {
    let mut bytes = block_bytes(BlockType::SystemConfig, &pattern(0x40, 3));
    let mut codec = BlockCodec::new(image_with(0, &bytes));
    let block = codec.get_block_info(0).unwrap();
    codec.check_crc(&block).unwrap();

    bytes[0x30] ^= 0x01;
    let mut codec = BlockCodec::new(image_with(0, &bytes));
    let block = codec.get_block_info(0).unwrap();
    let err = codec.check_crc(&block).unwrap_err();
    assert_eq!(
        err,
        Error::Format(FormatError::CrcMismatch {
            addr: 0,
            stored: block.crc,
            computed: block_crc(&bytes),
        })
    );
}
