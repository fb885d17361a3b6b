// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Runtime configuration: an optional JSON file, then command-line overrides.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use leo_common::geometry::ChipSelect;
use leo_common::SessionConfig;

/// Settings given on the command line; `None` keeps the file or default value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub flash_chip: Option<ChipSelect>,
    pub mm_base: Option<u32>,
    /// Doorbell polls for both mailboxes.
    pub retries: Option<u32>,
    pub retry_interval_us: Option<u32>,
}

impl Overrides {
    pub fn apply(&self, config: &mut SessionConfig) {
        if let Some(chip) = self.flash_chip {
            config.flash_chip = chip;
        }
        if let Some(base) = self.mm_base {
            config.mm_base = base;
        }
        if let Some(retries) = self.retries {
            config.mailbox_retry.max_attempts = retries;
            config.pmbox_retry.max_attempts = retries;
        }
        if let Some(interval) = self.retry_interval_us {
            config.mailbox_retry.interval_us = interval;
            config.pmbox_retry.interval_us = interval;
        }
    }
}

/// Parse a configuration file. Missing fields take their defaults.
pub fn parse(text: &str) -> Result<SessionConfig> {
    Ok(serde_json::from_str(text)?)
}

/// Effective configuration for this run.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config =
                parse(&text).with_context(|| format!("Invalid configuration in {}", path.display()))?;
            debug!("config: loaded {}", path.display());
            config
        }
        None => SessionConfig::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}
