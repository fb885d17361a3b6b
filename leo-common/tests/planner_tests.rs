// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update planning against synthetic flash contents.

mod common;

use common::{build_image, pattern, standard_image, Layout};
use leo_common::crc::block_crc;
use leo_common::error::{Error, FormatError};
use leo_common::geometry::{EraseOp, OP_SUBSECTOR_ERASE, SST26WF064C};
use leo_common::image::MemImage;
use leo_common::planner::{FirmwareUpdatePlanner, PlanMode, PlanOptions, UpdatePlan};
use leo_common::protocol::{AsicRevision, BlockType};
use leo_common::verify::VerifyTarget;

const CODE: u32 = 0x1_0000;
const SYSCFG: u32 = 0x4000;
const SYSCFG_SIZE: u32 = 0x230;
const CODE_END: u32 = 0x1_1490;

fn planner() -> FirmwareUpdatePlanner {
    FirmwareUpdatePlanner::new(&SST26WF064C)
}

fn candidate_with(code_payloads: Vec<Vec<u8>>) -> MemImage {
    build_image(&Layout {
        code_payloads,
        syscfg_payload: pattern(0x200, 0x55),
        pd_payload: pattern(0x100, 0x66),
        ..Layout::default()
    })
}

fn plan(current: &MemImage, candidate: &MemImage, opts: &PlanOptions) -> Result<UpdatePlan, Error> {
    let mut current = current.clone();
    planner().plan(&mut current, candidate, opts)
}

fn subsector(addr: u32) -> EraseOp {
    EraseOp {
        addr,
        size: 0x1000,
        opcode: OP_SUBSECTOR_ERASE,
    }
}

#[test]
fn test_incremental_same_size() {
    let current = standard_image();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11), pattern(0x400, 0x12)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::Incremental);
    assert_eq!(plan.steps.len(), 2);

    let syscfg = &plan.steps[0];
    assert_eq!(syscfg.erase, vec![subsector(SYSCFG)]);
    assert_eq!(syscfg.writes.len(), 1);
    assert_eq!(syscfg.writes[0].addr, SYSCFG);
    assert_eq!(
        syscfg.writes[0].data,
        candidate.slice(SYSCFG, SYSCFG_SIZE as usize).unwrap()
    );

    let code = &plan.steps[1];
    assert_eq!(code.erase, vec![subsector(CODE), subsector(CODE + 0x1000)]);
    assert_eq!(code.writes.len(), 1);
    assert_eq!(code.writes[0].addr, CODE);
    assert_eq!(code.writes[0].end(), CODE_END);

    assert_eq!(plan.erase_bytes(), 0x3000);
    assert_eq!(plan.write_bytes(), u64::from(SYSCFG_SIZE + CODE_END - CODE));
}

#[test]
fn test_verify_targets_follow_code_chain() {
    let current = standard_image();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11), pattern(0x400, 0x12)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    let starts: Vec<u32> = plan.verify.iter().map(|t| t.start).collect();
    assert_eq!(starts, vec![SYSCFG, CODE, 0x1_1030, 0x1_1460]);
    assert_eq!(plan.verify[0].len_words, SYSCFG_SIZE / 4);
    assert_eq!(plan.verify[1].len_words, 0x1030 / 4);
}

#[test]
fn test_growing_code_writes_candidate_extent() {
    let current = standard_image();
    // MAIN 0x1030 + MAIN 0x7a0 + END 0x30 ends the chain at 0x11800.
    let candidate = candidate_with(vec![pattern(0x1000, 0x21), pattern(0x770, 0x22)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    let code = &plan.steps[1];
    assert_eq!(code.writes[0].addr, CODE);
    assert_eq!(code.writes[0].end(), 0x1_1800);
    assert_eq!(code.erase, vec![subsector(CODE), subsector(CODE + 0x1000)]);
}

#[test]
fn test_shrinking_code_overwrites_old_extent() {
    let current = standard_image();
    let candidate = candidate_with(vec![pattern(0x1000, 0x31)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    let write = &plan.steps[1].writes[0];
    assert_eq!(write.end(), CODE_END);
    // Past the candidate END everything is erased state.
    assert!(write.data[0x1060..].iter().all(|b| *b == 0xff));
    assert_eq!(plan.verify.len(), 3);
}

#[test]
fn test_code_relocated_to_flash_slot() {
    let current = standard_image();
    let candidate = build_image(&Layout {
        code_addr: 0x2_0000,
        ..Layout::default()
    });

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    let write = &plan.steps[1].writes[0];
    assert_eq!(write.addr, CODE);
    assert_eq!(write.data, candidate.slice(0x2_0000, 0x1490).unwrap());
    let starts: Vec<u32> = plan.verify.iter().map(|t| t.start).collect();
    assert_eq!(starts, vec![SYSCFG, CODE, 0x1_1030, 0x1_1460]);
}

#[test]
fn test_sector_neighbours_restored() {
    let mut current = standard_image();
    current.write(0x4f00, &[0x12, 0x34, 0x56, 0x78]).unwrap();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11), pattern(0x400, 0x12)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    let writes = &plan.steps[0].writes;
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].addr, SYSCFG + SYSCFG_SIZE);
    assert_eq!(writes[1].end(), 0x5000);
    let at = (0x4f00 - writes[1].addr) as usize;
    assert_eq!(&writes[1].data[at..at + 4], &[0x12, 0x34, 0x56, 0x78]);
}

#[test]
fn test_plan_is_deterministic() {
    let current = standard_image();
    let candidate = candidate_with(vec![pattern(0x1000, 0x41), pattern(0x770, 0x42)]);
    let opts = PlanOptions::default();

    assert_eq!(
        plan(&current, &candidate, &opts).unwrap(),
        plan(&current, &candidate, &opts).unwrap()
    );
}

#[test]
fn test_blank_flash_full_rewrite_keeps_image_persistent_data() {
    let current = MemImage::default();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].erase, vec![EraseOp::chip(SST26WF064C.size)]);

    let pd = plan.steps[0]
        .writes
        .iter()
        .find(|w| w.addr == 0x6000)
        .unwrap();
    assert_eq!(&pd.data[0x24..0x124], pattern(0x100, 0x66).as_slice());
}

#[test]
fn test_legacy_toc_full_rewrite_preserves_persistent_data() {
    let current = build_image(&Layout {
        toc_config: [0, 0],
        ..Layout::default()
    });
    let candidate = candidate_with(vec![pattern(0x1000, 0x11)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);

    // FLASH_CTRL, TOC, DESCRIPTION, syscfg, PD, MAIN, END.
    let writes = &plan.steps[0].writes;
    assert_eq!(writes.len(), 7);
    let pd = writes.iter().find(|w| w.addr == 0x6000).unwrap();
    assert_eq!(&pd.data[0x24..0x124], Layout::default().pd_payload.as_slice());

    // Everything but PERSISTENT_DATA is verified in place.
    assert_eq!(plan.verify.len(), 6);
    assert!(!plan.verify.iter().any(|t| t.start == 0x6000));
}

/// TOC block at 0x100..0x1f8; its two footer words sit at 0x1f0.
const TOC_FOOTER: u32 = 0x1f0;

fn clean() -> PlanOptions {
    PlanOptions {
        preserve_persistent: false,
        ..PlanOptions::default()
    }
}

fn persistent_write(plan: &UpdatePlan) -> &[u8] {
    &plan.steps[0]
        .writes
        .iter()
        .find(|w| w.addr == 0x6000)
        .unwrap()
        .data[0x24..0x124]
}

#[test]
fn test_toc_without_footer_falls_back_to_full() {
    let mut current = standard_image();
    current.write(TOC_FOOTER, &[0xff; 8]).unwrap();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11)]);

    let plan_clean = plan(&current, &candidate, &clean()).unwrap();
    assert_eq!(plan_clean.mode, PlanMode::FullErase);
    assert_eq!(persistent_write(&plan_clean), pattern(0x100, 0x66).as_slice());

    // PERSISTENT_DATA further down is still found and carried over.
    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);
    assert_eq!(persistent_write(&plan), Layout::default().pd_payload.as_slice());
}

#[test]
fn test_toc_without_footer_and_description_falls_back_to_full() {
    let mut current = standard_image();
    current.write(TOC_FOOTER, &[0xff; 8]).unwrap();
    current.write(0x400, &[0xff; 0x100]).unwrap();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);
    assert_eq!(persistent_write(&plan), Layout::default().pd_payload.as_slice());
}

#[test]
fn test_toc_without_footer_and_nothing_after_falls_back_to_full() {
    let standard = standard_image();
    let mut current = MemImage::default();
    current
        .write(0, standard.slice(0, TOC_FOOTER as usize).unwrap())
        .unwrap();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11)]);

    let plan_clean = plan(&current, &candidate, &clean()).unwrap();
    assert_eq!(plan_clean.mode, PlanMode::FullErase);

    // No PERSISTENT_DATA on flash: the image's own block is written.
    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);
    assert_eq!(persistent_write(&plan), pattern(0x100, 0x66).as_slice());
}

#[test]
fn test_toc_crc_mismatch_falls_back_to_full() {
    let mut current = standard_image();
    current.write(0x124, &[0, 0, 0, 9]).unwrap();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);
}

#[test]
fn test_clean_full_rewrite_skips_persistent_data() {
    let current = standard_image();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11)]);
    let opts = PlanOptions {
        preserve_persistent: false,
        force_full: true,
        ..PlanOptions::default()
    };

    let plan = plan(&current, &candidate, &opts).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);
    let pd = plan.steps[0]
        .writes
        .iter()
        .find(|w| w.addr == 0x6000)
        .unwrap();
    assert_eq!(&pd.data[0x24..0x124], pattern(0x100, 0x66).as_slice());
}

#[test]
fn test_persistent_data_length_mismatch_copies_shorter() {
    let current = standard_image();
    let candidate = build_image(&Layout {
        pd_payload: vec![0x7f; 0x80],
        toc_config: [1, 0],
        ..Layout::default()
    });
    let opts = PlanOptions {
        force_full: true,
        ..PlanOptions::default()
    };

    let plan = plan(&current, &candidate, &opts).unwrap();
    let pd = plan.steps[0]
        .writes
        .iter()
        .find(|w| w.addr == 0x6000)
        .unwrap();
    assert_eq!(pd.data.len(), 0x24 + 0x80 + 12);
    assert_eq!(&pd.data[0x24..0xa4], &Layout::default().pd_payload[..0x80]);
}

#[test]
fn test_full_rewrite_requires_flash_persistent_data() {
    let current = build_image(&Layout {
        toc_config: [0, 0],
        pd_addr: None,
        ..Layout::default()
    });
    let candidate = standard_image();

    let err = plan(&current, &candidate, &PlanOptions::default()).unwrap_err();
    assert_eq!(
        err,
        Error::Format(FormatError::NotFound {
            block_type: BlockType::PersistentData
        })
    );
}

#[test]
fn test_missing_flash_end_falls_back_to_full() {
    let mut current = standard_image();
    // Wipe the END block header.
    current.write(0x1_1460, &[0xff; 8]).unwrap();
    let candidate = standard_image();

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);
}

#[test]
fn test_unsupported_candidate_toc() {
    let current = standard_image();
    let candidate = build_image(&Layout {
        toc_version: 2,
        ..Layout::default()
    });

    let err = plan(&current, &candidate, &PlanOptions::default()).unwrap_err();
    assert_eq!(
        err,
        Error::Format(FormatError::UnsupportedToc {
            config0: 1,
            config1: 0,
            version: 2
        })
    );
}

#[test]
fn test_unsupported_flash_toc_full_rewrite() {
    let current = build_image(&Layout {
        toc_config: [1, 5],
        ..Layout::default()
    });
    let plan = plan(&current, &standard_image(), &PlanOptions::default()).unwrap();
    assert_eq!(plan.mode, PlanMode::FullErase);
}

#[test]
fn test_asic_compatibility() {
    let current = standard_image();
    let candidate = standard_image();

    let a0 = PlanOptions {
        device_asic: Some(AsicRevision::A0),
        ..PlanOptions::default()
    };
    let err = plan(&current, &candidate, &a0).unwrap_err();
    assert_eq!(
        err,
        Error::Compatibility {
            image: AsicRevision::D5,
            device: AsicRevision::A0
        }
    );

    let d5 = PlanOptions {
        device_asic: Some(AsicRevision::D5),
        ..PlanOptions::default()
    };
    assert!(plan(&current, &candidate, &d5).is_ok());
}

#[test]
fn test_invalid_slot() {
    let opts = PlanOptions {
        slot: 3,
        ..PlanOptions::default()
    };
    let err = plan(&standard_image(), &standard_image(), &opts).unwrap_err();
    assert_eq!(err, Error::Format(FormatError::InvalidSlot { slot: 3 }));
}

#[test]
fn test_verify_crc_taken_from_candidate() {
    let current = standard_image();
    let candidate = candidate_with(vec![pattern(0x1000, 0x11), pattern(0x400, 0x12)]);

    let plan = plan(&current, &candidate, &PlanOptions::default()).unwrap();
    let syscfg = candidate.slice(SYSCFG, SYSCFG_SIZE as usize).unwrap();
    assert_eq!(
        plan.verify[0],
        VerifyTarget {
            start: SYSCFG,
            len_words: SYSCFG_SIZE / 4,
            crc: block_crc(syscfg),
        }
    );
}
