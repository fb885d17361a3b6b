// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Register transports: I2C through Linux i2c-dev and PCIe through a
//! memory-mapped BAR resource file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use embedded_hal::i2c::{Error as _, I2c};
use linux_embedded_hal::{Delay, I2cdev};
use log::debug;

use leo_common::error::TransportError;
use leo_common::{RegisterTransport, SharedBus};

type LinkResult<T> = std::result::Result<T, TransportError>;

/// Register write: command bytes, 24-bit address, 4 data bytes.
const I2C_WRITE: [u8; 3] = [0x4f, 0x08, 0x4e];
/// Register read request: command bytes, 24-bit address.
const I2C_READ: [u8; 3] = [0x4a, 0x04, 0x06];
/// Fetch of the read result; the reply is a status byte plus 4 data bytes.
const I2C_FETCH: u8 = 0x09;

const PCIE_SETTLE: Duration = Duration::from_micros(100);

fn addr24(addr: u32) -> [u8; 3] {
    let [_, hi, mid, lo] = addr.to_be_bytes();
    [hi, mid, lo]
}

/// Register access over any `embedded-hal` I2C bus.
pub struct I2cTransport<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> I2cTransport<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    fn fail(addr: u32, e: I::Error) -> TransportError {
        TransportError::new(addr, format!("i2c {:?}", e.kind()))
    }
}

impl<I: I2c> RegisterTransport for I2cTransport<I> {
    fn read_word(&mut self, addr: u32) -> LinkResult<u32> {
        let [a2, a1, a0] = addr24(addr);
        let [c0, c1, c2] = I2C_READ;
        self.i2c
            .write(self.address, &[c0, c1, c2, a2, a1, a0])
            .map_err(|e| Self::fail(addr, e))?;
        let mut reply = [0u8; 5];
        self.i2c
            .write_read(self.address, &[I2C_FETCH], &mut reply)
            .map_err(|e| Self::fail(addr, e))?;
        Ok(u32::from_le_bytes([reply[1], reply[2], reply[3], reply[4]]))
    }

    fn write_word(&mut self, addr: u32, value: u32) -> LinkResult<()> {
        let [a2, a1, a0] = addr24(addr);
        let [c0, c1, c2] = I2C_WRITE;
        let [v0, v1, v2, v3] = value.to_le_bytes();
        self.i2c
            .write(self.address, &[c0, c1, c2, a2, a1, a0, v0, v1, v2, v3])
            .map_err(|e| Self::fail(addr, e))
    }
}

/// BAR resource file mapped into this process.
pub struct PcieTransport {
    base: NonNull<u8>,
    len: usize,
    _file: File,
}

impl PcieTransport {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let len = usize::try_from(file.metadata()?.len())?;
        if len < 4 {
            bail!("{} is not a BAR resource ({} bytes)", path.display(), len);
        }

        // SAFETY: shared mapping of a file we keep open for the lifetime of
        // the mapping; failure is checked below.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("Failed to map {}", path.display()));
        }
        let base = NonNull::new(raw.cast::<u8>()).ok_or_else(|| anyhow!("mmap returned null"))?;
        debug!("pcie: mapped {} ({} bytes)", path.display(), len);
        Ok(Self {
            base,
            len,
            _file: file,
        })
    }

    /// Byte offset of an aligned word inside the mapping.
    fn offset(&self, addr: u32) -> LinkResult<usize> {
        let at = addr as usize;
        if at % 4 != 0 || at + 4 > self.len {
            return Err(TransportError::new(
                addr,
                format!("outside the {}-byte BAR or unaligned", self.len),
            ));
        }
        Ok(at)
    }
}

impl RegisterTransport for PcieTransport {
    fn read_word(&mut self, addr: u32) -> LinkResult<u32> {
        let at = self.offset(addr)?;
        thread::sleep(PCIE_SETTLE);
        // SAFETY: `at` is word aligned and the word lies inside the mapping.
        Ok(unsafe { self.base.as_ptr().add(at).cast::<u32>().read_volatile() })
    }

    fn write_word(&mut self, addr: u32, value: u32) -> LinkResult<()> {
        let at = self.offset(addr)?;
        thread::sleep(PCIE_SETTLE);
        // SAFETY: as in `read_word`.
        unsafe { self.base.as_ptr().add(at).cast::<u32>().write_volatile(value) };
        Ok(())
    }
}

impl Drop for PcieTransport {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe the mapping created in `open`.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

/// The link selected on the command line.
pub enum Link {
    I2c(I2cTransport<I2cdev>),
    Pcie(PcieTransport),
}

impl Link {
    pub fn i2c(path: &Path, address: u8) -> Result<Self> {
        let dev = I2cdev::new(path)
            .map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
        debug!("i2c: {} address 0x{:02x}", path.display(), address);
        Ok(Self::I2c(I2cTransport::new(dev, address)))
    }

    pub fn pcie(path: &Path) -> Result<Self> {
        Ok(Self::Pcie(PcieTransport::open(path)?))
    }
}

impl RegisterTransport for Link {
    fn read_word(&mut self, addr: u32) -> LinkResult<u32> {
        match self {
            Self::I2c(t) => t.read_word(addr),
            Self::Pcie(t) => t.read_word(addr),
        }
    }

    fn write_word(&mut self, addr: u32, value: u32) -> LinkResult<()> {
        match self {
            Self::I2c(t) => t.write_word(addr, value),
            Self::Pcie(t) => t.write_word(addr, value),
        }
    }
}

pub type Bus = SharedBus<Link, Delay>;

pub fn open_bus(link: Link) -> Bus {
    SharedBus::new(link, Delay)
}
