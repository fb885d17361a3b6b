// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use leo_common::events::EventLog;
use leo_common::geometry::ChipSelect;
use leo_common::UpdateOptions;

use crate::commands;
use crate::config::{self, Overrides};
use crate::transport::{open_bus, Link};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "leo-update")]
#[command(about = "Firmware update and mailbox tool for Leo CXL memory controllers")]
pub struct Cli {
    /// I2C bus device (e.g., /dev/i2c-1)
    #[arg(long, conflicts_with = "pcie")]
    pub i2c: Option<PathBuf>,

    /// I2C address of the controller in hex (0x27 for the first device on a board)
    #[arg(short, long, default_value = "0x27", value_parser = parse_hex_u8)]
    pub address: u8,

    /// PCIe BAR resource file (e.g., /sys/bus/pci/devices/0000:17:00.0/resource0)
    #[arg(long)]
    pub pcie: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Flash part: auto, sst26wf064c or mx25u6432f
    #[arg(long, value_parser = parse_chip)]
    pub flash_chip: Option<ChipSelect>,

    /// MM mailbox register base in hex
    #[arg(long, value_parser = parse_hex_u32)]
    pub mm_base: Option<u32>,

    /// Mailbox doorbell polls before giving up
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay between mailbox doorbell polls
    #[arg(long)]
    pub retry_interval_us: Option<u32>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            flash_chip: self.flash_chip,
            mm_base: self.mm_base,
            retries: self.retries,
            retry_interval_us: self.retry_interval_us,
        }
    }

    fn link(&self) -> Result<Link> {
        match (&self.i2c, &self.pcie) {
            (Some(dev), None) => Link::i2c(dev, self.address),
            (None, Some(resource)) => Link::pcie(resource),
            (None, None) => bail!("--i2c or --pcie is required for this command"),
            (Some(_), Some(_)) => bail!("--i2c and --pcie cannot be combined"),
        }
    }
}

/// Update behaviour shared by `plan`, `update` and `program`.
#[derive(Args, Debug, Clone, Copy)]
pub struct UpdateArgs {
    /// TOC slot to update
    #[arg(short, long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=2))]
    pub slot: u8,

    /// Do not carry persistent data over from flash
    #[arg(long)]
    pub clean: bool,

    /// Skip the ASIC compatibility check
    #[arg(long)]
    pub force: bool,

    /// Skip the CRC verification after writing
    #[arg(long)]
    pub no_verify: bool,

    /// Bulk erase and rewrite every block
    #[arg(long)]
    pub full: bool,
}

impl UpdateArgs {
    pub fn options(&self) -> UpdateOptions {
        UpdateOptions {
            slot: self.slot,
            clean: self.clean,
            force: self.force,
            verify: !self.no_verify,
            dry_run: false,
            full: self.full,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show firmware version, ASIC revision and flash part
    Status,

    /// List the blocks and TOC of an image file
    Inspect {
        /// Image in .mem format
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show what an update would erase and write, without touching flash
    Plan {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        args: UpdateArgs,
    },

    /// Update one slot, rewriting only the regions that change
    Update {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        args: UpdateArgs,

        /// Plan only
        #[arg(long)]
        dry_run: bool,
    },

    /// Bulk erase the flash and write every block of the image
    Program {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        args: UpdateArgs,
    },

    /// Check the active firmware in flash against an image
    Verify {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Check every block of an image at its address in flash
    VerifyAll {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Check that the firmware answers the MM mailbox
    Ping,

    /// Read CSR words through the MM mailbox
    CsrRead {
        /// Register address in hex
        #[arg(value_parser = parse_hex_u32)]
        addr: u32,

        /// Number of consecutive words
        #[arg(default_value = "1")]
        count: usize,
    },

    /// Write CSR words through the MM mailbox
    CsrWrite {
        /// Register address in hex
        #[arg(value_parser = parse_hex_u32)]
        addr: u32,

        /// Words in hex, written to consecutive addresses
        #[arg(required = true, value_parser = parse_hex_u32)]
        words: Vec<u32>,
    },

    /// Read CXL event records
    Events {
        /// info, warn, fail or fatal
        #[arg(short, long, default_value = "info", value_parser = parse_event_log)]
        log: EventLog,

        /// Keep reading until the log reports no more records
        #[arg(long)]
        all: bool,

        #[arg(long)]
        json: bool,
    },

    /// Clear CXL event records
    ClearEvents {
        /// info, warn, fail or fatal
        #[arg(short, long, default_value = "info", value_parser = parse_event_log)]
        log: EventLog,

        /// Record handles to clear; all records when omitted
        handles: Vec<u16>,
    },

    /// Media poison list
    Poison {
        #[command(subcommand)]
        action: PoisonAction,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Subcommand)]
pub enum PoisonAction {
    /// List poisoned addresses in a DPA range
    List {
        /// Start DPA in hex
        #[arg(value_parser = parse_hex_u64)]
        dpa: u64,

        /// Range length in hex
        #[arg(value_parser = parse_hex_u64)]
        range: u64,

        #[arg(long)]
        json: bool,
    },

    /// Poison one DPA
    Inject {
        #[arg(value_parser = parse_hex_u64)]
        dpa: u64,
    },

    /// Clear poison from one DPA
    Clear {
        #[arg(value_parser = parse_hex_u64)]
        dpa: u64,
    },
}

fn strip_hex(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Parse a hex string (with or without 0x prefix) into a u32.
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    u32::from_str_radix(strip_hex(s), 16).map_err(|e| format!("invalid hex value: {e}"))
}

fn parse_hex_u64(s: &str) -> Result<u64, String> {
    u64::from_str_radix(strip_hex(s), 16).map_err(|e| format!("invalid hex value: {e}"))
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    u8::from_str_radix(strip_hex(s), 16).map_err(|e| format!("invalid hex value: {e}"))
}

fn parse_chip(s: &str) -> Result<ChipSelect, String> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(ChipSelect::Auto),
        "sst26wf064c" | "sst26" => Ok(ChipSelect::Sst26wf064c),
        "mx25u6432f" | "mx25" => Ok(ChipSelect::Mx25u6432f),
        _ => Err(format!("unknown flash part '{s}'")),
    }
}

fn parse_event_log(s: &str) -> Result<EventLog, String> {
    match s.to_ascii_lowercase().as_str() {
        "info" | "informational" => Ok(EventLog::Informational),
        "warn" | "warning" => Ok(EventLog::Warning),
        "fail" | "failure" => Ok(EventLog::Failure),
        "fatal" => Ok(EventLog::Fatal),
        _ => Err(format!("unknown event log '{s}'")),
    }
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let config = config::load(cli.config.as_deref(), &cli.overrides())?;

    match &cli.command {
        Commands::Inspect { file, json } => commands::inspect(file, &config, *json),
        Commands::Config => commands::show_config(&config),

        cmd => {
            let bus = open_bus(cli.link()?);

            match cmd {
                Commands::Status => commands::status(&bus, &config),
                Commands::Plan { file, args } => commands::plan(&bus, &config, file, &args.options()),
                Commands::Update {
                    file,
                    args,
                    dry_run,
                } => {
                    let opts = UpdateOptions {
                        dry_run: *dry_run,
                        ..args.options()
                    };
                    commands::update(&bus, &config, file, &opts)
                }
                Commands::Program { file, args } => {
                    let opts = UpdateOptions {
                        full: true,
                        ..args.options()
                    };
                    commands::update(&bus, &config, file, &opts)
                }
                Commands::Verify { file } => commands::verify(&bus, &config, file),
                Commands::VerifyAll { file } => commands::verify_all(&bus, &config, file),
                Commands::Ping => commands::ping(&bus, &config),
                Commands::CsrRead { addr, count } => {
                    commands::csr_read(&bus, &config, *addr, *count)
                }
                Commands::CsrWrite { addr, words } => {
                    commands::csr_write(&bus, &config, *addr, words)
                }
                Commands::Events { log, all, json } => {
                    commands::events(&bus, &config, *log, *all, *json)
                }
                Commands::ClearEvents { log, handles } => {
                    commands::clear_events(&bus, &config, *log, handles)
                }
                Commands::Poison { action } => match action {
                    PoisonAction::List { dpa, range, json } => {
                        commands::poison_list(&bus, &config, *dpa, *range, *json)
                    }
                    PoisonAction::Inject { dpa } => commands::poison_inject(&bus, &config, *dpa),
                    PoisonAction::Clear { dpa } => commands::poison_clear(&bus, &config, *dpa),
                },
                Commands::Inspect { .. } | Commands::Config => bail!("unreachable"),
            }
        }
    }
}
