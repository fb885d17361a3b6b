// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for device and image operations.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use linux_embedded_hal::Delay;
use log::warn;
use serde::Serialize;

use leo_common::block::{Block, BlockCodec};
use leo_common::crc::block_crc;
use leo_common::events::{ClearEvents, EventLog, EventLogPage, EventRecord};
use leo_common::session::{read_asic_revision, read_device_info, UpdateReport};
use leo_common::toc::{read_description, read_toc, DescriptionEntry};
use leo_common::{
    CrcVerifier, MemImage, MmChannel, NorFlash, Phase, PlanMode, PmboxChannel, Progress,
    SessionConfig, SsiFlash, TableOfContents, UpdateOptions, UpdatePlan, UpdateSession,
};

use crate::transport::{Bus, Link};

type Session<'a> = UpdateSession<SsiFlash<'a, Link, Delay>, CrcVerifier<'a, Link, Delay>>;

/// Progress bars for erase, write and verify phases.
#[derive(Default)]
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl Progress for BarProgress {
    fn start(&mut self, phase: Phase, total: u64) {
        let units = match phase {
            Phase::Erase | Phase::Write => "{bytes}/{total_bytes}",
            Phase::Verify => "{pos}/{len} blocks",
        };
        let template = format!(
            "{{msg:6}} {{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {units} ({{eta}})"
        );
        let style = ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        let bar = ProgressBar::new(total);
        bar.set_style(style);
        bar.set_message(phase.to_string());
        self.bar = Some(bar);
    }

    fn advance(&mut self, amount: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(amount);
        }
    }

    fn finish(&mut self, _phase: Phase) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

fn mm<'a>(bus: &'a Bus, config: &SessionConfig) -> MmChannel<'a, Link, Delay> {
    MmChannel::mm(bus, config.mm_base, config.mailbox_retry)
}

fn pmbox<'a>(bus: &'a Bus, config: &SessionConfig) -> PmboxChannel<'a, Link, Delay> {
    PmboxChannel::pmbox(bus, config.pmbox_retry)
}

fn open_flash<'a>(bus: &'a Bus, config: &SessionConfig) -> Result<SsiFlash<'a, Link, Delay>> {
    let flash = match config.flash_chip.chip() {
        Some(chip) => SsiFlash::new(bus, mm(bus, config), chip)?,
        None => SsiFlash::detect(bus, mm(bus, config))
            .context("Flash auto-detection failed, select the part with --flash-chip")?,
    };
    Ok(flash.with_retry(config.flash_fifo_retry, config.flash_busy_retry))
}

fn open_session<'a>(bus: &'a Bus, config: &SessionConfig) -> Result<Session<'a>> {
    let flash = open_flash(bus, config)?;
    let verifier = CrcVerifier::new(mm(bus, config));
    Ok(UpdateSession::new(flash, verifier, config.clone()))
}

fn load_image(file: &Path) -> Result<MemImage> {
    let text =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let image = MemImage::parse(&text).with_context(|| format!("Failed to parse {}", file.display()))?;
    match image.range() {
        Some((lo, hi)) => println!("Image:   {} (0x{:06x}..0x{:06x})", file.display(), lo, hi),
        None => bail!("{} contains no data", file.display()),
    }
    Ok(image)
}

fn mode_name(mode: PlanMode) -> &'static str {
    match mode {
        PlanMode::Incremental => "incremental",
        PlanMode::FullErase => "full erase",
    }
}

fn print_plan(plan: &UpdatePlan) {
    println!("Mode:    {}", mode_name(plan.mode));
    for (i, step) in plan.steps.iter().enumerate() {
        println!("Step {}:", i);
        for op in &step.erase {
            if op.is_chip() {
                println!("  erase  chip");
            } else {
                println!(
                    "  erase  0x{:06x}..0x{:06x} (op 0x{:02x})",
                    op.addr,
                    op.end(),
                    op.opcode
                );
            }
        }
        for write in &step.writes {
            println!(
                "  write  0x{:06x}..0x{:06x} ({} bytes)",
                write.addr,
                write.end(),
                write.data.len()
            );
        }
    }
    println!(
        "Total:   {} bytes erased, {} bytes written, {} blocks to verify",
        plan.erase_bytes(),
        plan.write_bytes(),
        plan.verify.len()
    );
}

/// Show firmware, silicon and flash identification.
pub fn status(bus: &Bus, config: &SessionConfig) -> Result<()> {
    let info = read_device_info(bus, config)?;
    let mut flash = open_flash(bus, config)?;
    let jedec = flash.read_jedec_id()?;

    println!("Device Status:");
    println!(
        "  Firmware:    {}.{} build {}",
        info.firmware.major, info.firmware.minor, info.firmware.build
    );
    println!("  Boot status: 0x{:08x}", info.boot_status);
    println!("  ASIC:        {}", info.asic);
    println!("  Flash:       {} (JEDEC 0x{:06x})", flash.chip().name, jedec);
    Ok(())
}

#[derive(Serialize)]
struct BlockReport {
    #[serde(flatten)]
    block: Block,
    local_crc: u32,
    crc_ok: bool,
}

#[derive(Serialize)]
struct InspectReport {
    range: Option<(u32, u32)>,
    blocks: Vec<BlockReport>,
    toc: Option<TableOfContents>,
    description: Option<DescriptionEntry>,
}

/// List the blocks of an image file.
pub fn inspect(file: &Path, config: &SessionConfig, json: bool) -> Result<()> {
    let text =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let image = MemImage::parse(&text).with_context(|| format!("Failed to parse {}", file.display()))?;
    let mut codec = BlockCodec::with_limits(&image, config.scan);

    let mut blocks = Vec::new();
    for block in codec.blocks()? {
        let local_crc = block_crc(&codec.read_block(&block)?);
        blocks.push(BlockReport {
            crc_ok: local_crc == block.crc,
            local_crc,
            block,
        });
    }
    let toc = match read_toc(&mut codec) {
        Ok((_, toc)) => Some(toc),
        Err(e) => {
            warn!("inspect: no usable TOC ({})", e);
            None
        }
    };
    let description = read_description(&mut codec).ok();
    let report = InspectReport {
        range: image.range(),
        blocks,
        toc,
        description,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Some((lo, hi)) = report.range {
        println!("Image {} (0x{:06x}..0x{:06x})", file.display(), lo, hi);
    }
    println!(
        "  {:<16} {:>4} {:>19} {:>8} {:>8}",
        "TYPE", "VER", "RANGE", "CRC", "LOCAL"
    );
    for r in &report.blocks {
        let b = &r.block;
        println!(
            "  {:<16} {:>4} 0x{:06x}..0x{:06x} {:08x} {:08x}{}",
            b.block_type.to_string(),
            b.version,
            b.start_addr,
            b.end_addr,
            b.crc,
            r.local_crc,
            if r.crc_ok { "" } else { "  MISMATCH" }
        );
    }
    if let Some(d) = &report.description {
        println!(
            "Description: ASIC {} fw 0x{:x} build {} builder {}",
            d.asic(),
            d.fw_version,
            d.build_id,
            d.builder
        );
    }
    if let Some(toc) = &report.toc {
        println!("TOC:");
        for (i, c) in toc.code.iter().enumerate() {
            println!(
                "  code[{}]   0x{:06x} version {}{}{}",
                i,
                c.addr_pointer,
                c.img_version,
                if c.is_valid() { " valid" } else { "" },
                if c.is_primary() { " primary" } else { "" }
            );
        }
        for (i, s) in toc.syscfg.iter().enumerate() {
            println!(
                "  syscfg[{}] 0x{:06x} code slot {}{}",
                i,
                s.addr_pointer,
                s.code_slot_correlation,
                if s.is_valid() { " valid" } else { "" }
            );
        }
    }
    let bad = report.blocks.iter().filter(|r| !r.crc_ok).count();
    if bad > 0 {
        bail!("{} block(s) fail the local CRC check", bad);
    }
    Ok(())
}

/// Print the update plan without touching flash.
pub fn plan(bus: &Bus, config: &SessionConfig, file: &Path, opts: &UpdateOptions) -> Result<()> {
    let image = load_image(file)?;
    let asic = read_asic_revision(bus, config)?;
    let mut session = open_session(bus, config)?;
    let plan = session.plan(&image, opts, Some(asic))?;
    print_plan(&plan);
    Ok(())
}

/// Plan, program and verify.
pub fn update(bus: &Bus, config: &SessionConfig, file: &Path, opts: &UpdateOptions) -> Result<()> {
    let image = load_image(file)?;
    let asic = read_asic_revision(bus, config)?;
    println!("Device:  ASIC {}", asic);
    println!("Slot:    {}", opts.slot);
    println!();

    let mut session = open_session(bus, config)?;
    let mut progress = BarProgress::default();
    let report: UpdateReport = session.run(&image, opts, Some(asic), &mut progress)?;

    if !report.programmed {
        print_plan(&report.plan);
        println!();
        println!("Dry run: flash left untouched.");
        return Ok(());
    }
    println!();
    println!(
        "Firmware written ({}, {} bytes){}.",
        mode_name(report.plan.mode),
        report.plan.write_bytes(),
        if report.verified { " and verified" } else { "" }
    );
    println!("Power cycle the device to load the new firmware.");
    Ok(())
}

/// CRC-check the active firmware against an image.
pub fn verify(bus: &Bus, config: &SessionConfig, file: &Path) -> Result<()> {
    let image = load_image(file)?;
    let mut session = open_session(bus, config)?;
    session.verify_image(&image, &mut BarProgress::default())?;
    println!("Flash matches {}.", file.display());
    Ok(())
}

/// CRC-check every block of an image in place.
pub fn verify_all(bus: &Bus, config: &SessionConfig, file: &Path) -> Result<()> {
    let image = load_image(file)?;
    let mut session = open_session(bus, config)?;
    session.verify_all(&image, &mut BarProgress::default())?;
    println!("All blocks of {} verified.", file.display());
    Ok(())
}

pub fn ping(bus: &Bus, config: &SessionConfig) -> Result<()> {
    mm(bus, config).ping()?;
    println!("OK");
    Ok(())
}

pub fn csr_read(bus: &Bus, config: &SessionConfig, addr: u32, count: usize) -> Result<()> {
    let words = mm(bus, config).csr_read(addr, count)?;
    for (i, word) in words.iter().enumerate() {
        println!("0x{:08x}: 0x{:08x}", addr + 4 * i as u32, word);
    }
    Ok(())
}

pub fn csr_write(bus: &Bus, config: &SessionConfig, addr: u32, words: &[u32]) -> Result<()> {
    mm(bus, config).csr_write(addr, words)?;
    println!("Wrote {} word(s) at 0x{:08x}.", words.len(), addr);
    Ok(())
}

fn print_event_page(page: &EventLogPage) {
    let h = &page.header;
    println!(
        "Log: {} record(s){}{}",
        h.record_count,
        if h.more_records { ", more pending" } else { "" },
        if h.overflow {
            format!(", overflowed {} time(s)", h.overflow_count)
        } else {
            String::new()
        }
    );
    let Some((rec, body)) = &page.record else {
        return;
    };
    println!(
        "  handle {} severity {} timestamp {}{}",
        rec.handle,
        rec.severity,
        rec.timestamp,
        if rec.maintenance_needed { " maintenance-needed" } else { "" }
    );
    match body {
        EventRecord::Dram(e) => println!(
            "  DRAM dpa 0x{:x} type {} channel {} rank {} bank-group {} bank {} row {} column {}{}",
            e.dpa,
            e.event_type,
            e.channel,
            e.rank,
            e.bank_group,
            e.bank,
            e.row,
            e.column,
            if e.uncorrectable { " uncorrectable" } else { "" }
        ),
        EventRecord::MemoryModule(m) => println!(
            "  Memory module type {} health 0x{:02x} media 0x{:02x} life {}% temperature {} dirty shutdowns {}",
            m.event_type,
            m.health_status,
            m.media_status,
            m.life_used,
            m.device_temperature,
            m.dirty_shutdown_count
        ),
        EventRecord::Unknown(data) => println!("  Unknown record ({} bytes)", data.len()),
    }
}

pub fn events(bus: &Bus, config: &SessionConfig, log: EventLog, all: bool, json: bool) -> Result<()> {
    let channel = pmbox(bus, config);
    let pages = if all {
        channel.drain_event_log(log)?
    } else {
        vec![channel.get_event_records(log)?]
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&pages)?);
        return Ok(());
    }
    for page in &pages {
        print_event_page(page);
    }
    Ok(())
}

pub fn clear_events(bus: &Bus, config: &SessionConfig, log: EventLog, handles: &[u16]) -> Result<()> {
    let which = if handles.is_empty() {
        ClearEvents::All
    } else {
        ClearEvents::Handles(handles)
    };
    pmbox(bus, config).clear_event_records(log, which)?;
    if handles.is_empty() {
        println!("Cleared all {:?} records.", log);
    } else {
        println!("Cleared {} {:?} record(s).", handles.len(), log);
    }
    Ok(())
}

pub fn poison_list(bus: &Bus, config: &SessionConfig, dpa: u64, range: u64, json: bool) -> Result<()> {
    let list = pmbox(bus, config).get_poison_list(dpa, range)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }
    println!(
        "Poison list: {} record(s){}{}",
        list.records.len(),
        if list.more_records { ", more pending" } else { "" },
        if list.scan_in_progress { ", scan in progress" } else { "" }
    );
    for r in &list.records {
        println!("  dpa 0x{:012x} length {}", r.dpa, r.length);
    }
    Ok(())
}

pub fn poison_inject(bus: &Bus, config: &SessionConfig, dpa: u64) -> Result<()> {
    pmbox(bus, config).inject_poison(dpa)?;
    println!("Poisoned DPA 0x{:x}.", dpa);
    Ok(())
}

pub fn poison_clear(bus: &Bus, config: &SessionConfig, dpa: u64) -> Result<()> {
    pmbox(bus, config).clear_poison(dpa)?;
    println!("Cleared poison at DPA 0x{:x}.", dpa);
    Ok(())
}

pub fn show_config(config: &SessionConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
