// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Executes an [`UpdatePlan`] against a NOR flash.

use log::{debug, info, warn};

use crate::error::Result;
use crate::flash::NorFlash;
use crate::planner::{PlanStep, UpdatePlan, WriteRange};
use crate::progress::{Phase, Progress};

pub struct FlashProgrammer<F> {
    flash: F,
}

impl<F: NorFlash> FlashProgrammer<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Run the plan step by step: erase a step's ranges, then program the
    /// writes landing in them. Block protection, when the chip has it, is
    /// lifted for the duration and restored even if a step fails.
    pub fn execute<P: Progress + ?Sized>(&mut self, plan: &UpdatePlan, progress: &mut P) -> Result<()> {
        let protect = self.flash.chip().block_protect;
        if protect {
            self.flash.set_block_protect(false)?;
        }
        let result = self.run(plan, progress);
        if protect {
            if let Err(e) = self.flash.set_block_protect(true) {
                if result.is_ok() {
                    return Err(e);
                }
                warn!("program: restoring block protection failed: {}", e);
            }
        }
        result
    }

    fn run<P: Progress + ?Sized>(&mut self, plan: &UpdatePlan, progress: &mut P) -> Result<()> {
        for (i, step) in plan.steps.iter().enumerate() {
            debug!("program: step {} of {}", i + 1, plan.steps.len());
            self.step(step, progress)?;
        }
        info!(
            "program: {} bytes erased, {} bytes written",
            plan.erase_bytes(),
            plan.write_bytes()
        );
        Ok(())
    }

    fn step<P: Progress + ?Sized>(&mut self, step: &PlanStep, progress: &mut P) -> Result<()> {
        let erase_total: u64 = step.erase.iter().map(|op| u64::from(op.size)).sum();
        progress.start(Phase::Erase, erase_total);
        for op in &step.erase {
            if op.is_chip() {
                info!("program: bulk erase");
            } else {
                debug!("program: erase 0x{:06x}..0x{:06x} (0x{:02x})", op.addr, op.end(), op.opcode);
            }
            self.flash.erase(op)?;
            progress.advance(u64::from(op.size));
        }
        progress.finish(Phase::Erase);

        let write_total: u64 = step.writes.iter().map(|w| w.data.len() as u64).sum();
        progress.start(Phase::Write, write_total);
        for write in &step.writes {
            self.write(write, progress)?;
        }
        progress.finish(Phase::Write);
        Ok(())
    }

    /// Program `range` page by page. Pages left fully erased are skipped.
    fn write<P: Progress + ?Sized>(&mut self, range: &WriteRange, progress: &mut P) -> Result<()> {
        let page = self.flash.chip().page_size;
        let mut addr = range.addr;
        let mut rest = range.data.as_slice();
        while !rest.is_empty() {
            let room = (page - addr % page) as usize;
            let (chunk, tail) = rest.split_at(room.min(rest.len()));
            if chunk.iter().any(|b| *b != 0xff) {
                self.flash.program_page(addr, chunk)?;
            }
            progress.advance(chunk.len() as u64);
            addr += chunk.len() as u32;
            rest = tail;
        }
        Ok(())
    }
}
