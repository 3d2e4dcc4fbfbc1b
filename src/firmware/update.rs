//! # Firmware Update Procedure
//!
//! Bootloader entry, erase of the IVT and application regions, page-wise
//! programming, then a jump back to the application.
//!
//! The first failed step aborts the update. There is no multi-page
//! transaction on the controller: an abort after erasing has started leaves
//! the application missing or partial, and the controller stays in its
//! bootloader until a later update completes.

use std::time::Duration;

use tracing::{debug, error, info};

use super::{
    page_base, region_of, word_address, HexRecord, FLASH_ERASED_BYTE, FLASH_PAGE_SIZE_BYTES,
    UPDATE_REGIONS,
};
use crate::controller::PowerController;
use crate::error::{PwrctlError, Result};

/// One page-sized program command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWrite {
    /// Byte address of the page start
    pub page_address: u32,
    /// Full page contents, erased value where the record has no data
    pub data: [u8; FLASH_PAGE_SIZE_BYTES],
}

impl PageWrite {
    pub fn word_address(&self) -> u32 {
        word_address(self.page_address)
    }
}

/// Page writes derived from a flash image
#[derive(Debug, Clone, Default)]
pub struct ProgrammingPlan {
    pub writes: Vec<PageWrite>,
    /// Records outside both writable regions
    pub skipped_records: usize,
}

/// Turn image records into page writes
///
/// Each record produces one write per page it touches; bytes of the page
/// outside the record stay at the erased value, which leaves already
/// programmed flash unchanged. Records starting outside the IVT and
/// application regions are skipped.
///
/// # Errors
///
/// Returns `Firmware` if a record starts inside a region but runs past its
/// end (it would program the bootloader or unmapped flash).
pub fn plan_programming(records: &[HexRecord]) -> Result<ProgrammingPlan> {
    let mut plan = ProgrammingPlan::default();

    for record in records.iter().filter(|r| !r.data.is_empty()) {
        let region = match region_of(record.address) {
            Some(region) => region,
            None => {
                debug!("Skipping record at 0x{:06X} outside writable flash", record.address);
                plan.skipped_records += 1;
                continue;
            }
        };

        if record.end_address() > region.end {
            return Err(PwrctlError::Firmware(format!(
                "record at 0x{:06X} ({} bytes) runs past the end of the {} region (0x{:06X})",
                record.address,
                record.data.len(),
                region.name,
                region.end
            )));
        }

        let mut offset = 0;
        while offset < record.data.len() {
            let address = record.address + offset as u32;
            let page_address = page_base(address);
            let in_page = (address - page_address) as usize;
            let n = (FLASH_PAGE_SIZE_BYTES - in_page).min(record.data.len() - offset);

            let mut data = [FLASH_ERASED_BYTE; FLASH_PAGE_SIZE_BYTES];
            data[in_page..in_page + n].copy_from_slice(&record.data[offset..offset + n]);
            plan.writes.push(PageWrite { page_address, data });

            offset += n;
        }
    }

    Ok(plan)
}

/// Counts from a completed update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateReport {
    pub entered_bootloader: bool,
    pub pages_erased: usize,
    pub pages_written: usize,
    pub records_skipped: usize,
}

fn step_failed(step: impl Into<String>) -> impl FnOnce(PwrctlError) -> PwrctlError {
    let step = step.into();
    move |source| {
        error!("Firmware update aborted during {}: {}", step, source);
        PwrctlError::UpdateStep {
            step,
            source: Box::new(source),
        }
    }
}

/// Drives a firmware update over a [`PowerController`]
pub struct FirmwareUpdater {
    controller: PowerController,
    settle_delay: Duration,
}

impl FirmwareUpdater {
    /// # Arguments
    ///
    /// * `controller` - Controller handle (its timeout applies to every step)
    /// * `settle_delay` - Wait after JUMP_TO_BOOTLOADER while the controller reboots
    pub fn new(controller: PowerController, settle_delay: Duration) -> Self {
        Self {
            controller,
            settle_delay,
        }
    }

    /// Flash `records` onto the controller
    ///
    /// The image is validated before anything is sent.
    ///
    /// # Errors
    ///
    /// * `Firmware` - the image is not safe to program (nothing was sent)
    /// * `UpdateStep` - a step failed; wraps the underlying error (usually `Timeout`)
    pub async fn run(&self, records: &[HexRecord]) -> Result<UpdateReport> {
        let plan = plan_programming(records)?;
        let mut report = UpdateReport {
            records_skipped: plan.skipped_records,
            ..UpdateReport::default()
        };
        info!(
            "Programming {} page writes ({} records skipped)",
            plan.writes.len(),
            plan.skipped_records
        );

        let in_bootloader = self
            .controller
            .is_in_bootloader()
            .await
            .map_err(step_failed("bootloader query"))?;

        if !in_bootloader {
            info!("In user application, jumping to bootloader");
            self.controller
                .jump_to_bootloader()
                .await
                .map_err(step_failed("jump to bootloader"))?;
            tokio::time::sleep(self.settle_delay).await;
            report.entered_bootloader = true;
        }

        info!("Erasing flash");
        for region in UPDATE_REGIONS.iter() {
            for page in region.page_addresses() {
                debug!("Erasing page 0x{:06X}", page);
                self.controller
                    .erase_page(word_address(page))
                    .await
                    .map_err(step_failed(format!("erase of page 0x{:06X}", page)))?;
                report.pages_erased += 1;
            }
        }

        info!("Writing flash");
        for write in &plan.writes {
            debug!("Writing page 0x{:06X}", write.page_address);
            self.controller
                .write_page(write.word_address(), &write.data)
                .await
                .map_err(step_failed(format!("write of page 0x{:06X}", write.page_address)))?;
            report.pages_written += 1;
        }

        info!("Jumping to application");
        self.controller
            .jump_to_program()
            .await
            .map_err(step_failed("jump to application"))?;

        info!(
            "Firmware update complete: {} pages erased, {} page writes",
            report.pages_erased, report.pages_written
        );
        Ok(report)
    }
}
