// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update orchestration: plan, program, verify.

use log::info;
use serde::{Deserialize, Serialize};

use embedded_hal::delay::DelayNs;

use crate::block::{BlockCodec, ScanLimits};
use crate::error::Result;
use crate::flash::{LiveFlash, NorFlash};
use crate::geometry::ChipSelect;
use crate::image::MemImage;
use crate::planner::{FirmwareUpdatePlanner, PlanMode, PlanOptions, UpdatePlan};
use crate::programmer::FlashProgrammer;
use crate::progress::Progress;
use crate::protocol::{
    AsicRevision, FirmwareVersion, RetryPolicy, FW_INFO_REGS, LEO_MISC_REG, MM_MAILBOX_BASE,
};
use crate::transport::{RegisterTransport, SharedBus};
use crate::verify::{all_block_targets, image_targets, run_targets, BlockVerifier};

/// Runtime settings. Every field has a default, so a partial JSON file is
/// enough to override a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub flash_chip: ChipSelect,
    pub mm_base: u32,
    pub asic_id_register: u32,
    pub mailbox_retry: RetryPolicy,
    pub pmbox_retry: RetryPolicy,
    pub flash_fifo_retry: RetryPolicy,
    pub flash_busy_retry: RetryPolicy,
    pub scan: ScanLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flash_chip: ChipSelect::Auto,
            mm_base: MM_MAILBOX_BASE,
            asic_id_register: LEO_MISC_REG,
            mailbox_retry: RetryPolicy::MM_MAILBOX,
            pmbox_retry: RetryPolicy::PMBOX,
            flash_fifo_retry: RetryPolicy::SSI_FIFO,
            flash_busy_retry: RetryPolicy::FLASH_BUSY,
            scan: ScanLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    pub slot: u8,
    /// Do not carry PERSISTENT_DATA over from flash.
    pub clean: bool,
    /// Skip the ASIC compatibility check.
    pub force: bool,
    pub verify: bool,
    pub dry_run: bool,
    /// Bulk erase and rewrite every block.
    pub full: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            slot: 0,
            clean: false,
            force: false,
            verify: true,
            dry_run: false,
            full: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub plan: UpdatePlan,
    pub programmed: bool,
    pub verified: bool,
}

/// Identification words read straight from device registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub firmware: FirmwareVersion,
    pub boot_status: u32,
    pub asic: AsicRevision,
}

pub fn read_asic_revision<T: RegisterTransport, D: DelayNs>(
    bus: &SharedBus<T, D>,
    config: &SessionConfig,
) -> Result<AsicRevision> {
    let raw = bus.lock()?.read(config.asic_id_register)?;
    Ok(AsicRevision::from_misc_register(raw))
}

pub fn read_device_info<T: RegisterTransport, D: DelayNs>(
    bus: &SharedBus<T, D>,
    config: &SessionConfig,
) -> Result<DeviceInfo> {
    let asic = read_asic_revision(bus, config)?;
    let mut guard = bus.lock()?;
    let version = guard.read(FW_INFO_REGS[0])?;
    let build = guard.read(FW_INFO_REGS[1])?;
    let boot_status = guard.read(FW_INFO_REGS[2])?;
    Ok(DeviceInfo {
        firmware: FirmwareVersion::from_registers(version, build),
        boot_status,
        asic,
    })
}

/// One device's flash, its verifier and the settings they run with.
pub struct UpdateSession<F, V> {
    flash: LiveFlash<F>,
    verifier: V,
    config: SessionConfig,
}

impl<F: NorFlash, V: BlockVerifier> UpdateSession<F, V> {
    pub fn new(flash: F, verifier: V, config: SessionConfig) -> Self {
        Self {
            flash: LiveFlash::new(flash),
            verifier,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn flash(&mut self) -> &mut F {
        self.flash.flash()
    }

    pub fn into_parts(self) -> (F, V) {
        (self.flash.into_inner(), self.verifier)
    }

    /// Plan without touching flash. `device` is the revision reported by
    /// the device; it is ignored when `opts.force` is set.
    pub fn plan(
        &mut self,
        candidate: &MemImage,
        opts: &UpdateOptions,
        device: Option<AsicRevision>,
    ) -> Result<UpdatePlan> {
        let chip = self.flash.flash().chip();
        let planner = FirmwareUpdatePlanner::with_limits(chip, self.config.scan);
        let plan_opts = PlanOptions {
            slot: opts.slot,
            preserve_persistent: !opts.clean,
            device_asic: if opts.force { None } else { device },
            force_full: opts.full,
        };
        planner.plan(&mut self.flash, candidate, &plan_opts)
    }

    /// Plan, then program and verify unless `opts.dry_run` is set.
    pub fn run<P: Progress + ?Sized>(
        &mut self,
        candidate: &MemImage,
        opts: &UpdateOptions,
        device: Option<AsicRevision>,
        progress: &mut P,
    ) -> Result<UpdateReport> {
        let plan = self.plan(candidate, opts, device)?;
        if opts.dry_run {
            info!("update: dry run, flash left untouched");
            return Ok(UpdateReport {
                plan,
                programmed: false,
                verified: false,
            });
        }

        FlashProgrammer::new(self.flash.flash()).execute(&plan, progress)?;
        self.flash.invalidate();

        if opts.verify {
            run_targets(&mut self.verifier, &plan.verify, progress)?;
            info!("update: {} blocks verified", plan.verify.len());
        }
        let mode = match plan.mode {
            PlanMode::Incremental => "incremental",
            PlanMode::FullErase => "full",
        };
        info!("update: {} update of slot {} complete", mode, opts.slot);
        Ok(UpdateReport {
            plan,
            programmed: true,
            verified: opts.verify,
        })
    }

    /// Check the active firmware in flash against `candidate`.
    pub fn verify_image<P: Progress + ?Sized>(
        &mut self,
        candidate: &MemImage,
        progress: &mut P,
    ) -> Result<()> {
        self.flash.invalidate();
        let targets = {
            let mut current = BlockCodec::with_limits(&mut self.flash, self.config.scan);
            let mut image = BlockCodec::with_limits(candidate, self.config.scan);
            image_targets(&mut current, &mut image)?
        };
        run_targets(&mut self.verifier, &targets, progress)
    }

    /// Check every block of `candidate` at its own address.
    pub fn verify_all<P: Progress + ?Sized>(
        &mut self,
        candidate: &MemImage,
        progress: &mut P,
    ) -> Result<()> {
        let mut image = BlockCodec::with_limits(candidate, self.config.scan);
        let targets = all_block_targets(&mut image)?;
        run_targets(&mut self.verifier, &targets, progress)
    }
}
