// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Register-level access to the device and the shared bus handle.
//!
//! Every higher layer (mailboxes, SPI controller, CSR helpers) reaches the
//! device through a [`SharedBus`]. A layer locks the bus for the duration of
//! one logical transaction; a nested lock attempt fails with
//! [`MailboxError::Busy`] instead of interleaving register accesses.
//!
//! The bus is built on `RefCell` and is therefore `!Sync`: it is meant for a
//! single thread driving one device.

use core::cell::{RefCell, RefMut};

use embedded_hal::delay::DelayNs;

use crate::error::{MailboxError, TransportError};
use crate::protocol::RetryPolicy;

/// 32-bit register read/write over I2C, PCIe or a test double.
pub trait RegisterTransport {
    fn read_word(&mut self, addr: u32) -> Result<u32, TransportError>;
    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), TransportError>;
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for &mut T {
    fn read_word(&mut self, addr: u32) -> Result<u32, TransportError> {
        (**self).read_word(addr)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), TransportError> {
        (**self).write_word(addr, value)
    }
}

struct BusInner<T, D> {
    transport: T,
    delay: D,
}

/// Transport plus delay provider, shared by reference between layers.
pub struct SharedBus<T, D> {
    inner: RefCell<BusInner<T, D>>,
}

impl<T: RegisterTransport, D: DelayNs> SharedBus<T, D> {
    pub fn new(transport: T, delay: D) -> Self {
        Self {
            inner: RefCell::new(BusInner { transport, delay }),
        }
    }

    /// Take exclusive use of the bus until the guard is dropped.
    pub fn lock(&self) -> Result<BusGuard<'_, T, D>, MailboxError> {
        self.inner
            .try_borrow_mut()
            .map(|inner| BusGuard { inner })
            .map_err(|_| MailboxError::Busy)
    }

    pub fn into_inner(self) -> (T, D) {
        let inner = self.inner.into_inner();
        (inner.transport, inner.delay)
    }
}

/// Exclusive access to the bus for one transaction.
pub struct BusGuard<'a, T, D> {
    inner: RefMut<'a, BusInner<T, D>>,
}

impl<T: RegisterTransport, D: DelayNs> BusGuard<'_, T, D> {
    pub fn read(&mut self, addr: u32) -> Result<u32, TransportError> {
        self.inner.transport.read_word(addr)
    }

    pub fn write(&mut self, addr: u32, value: u32) -> Result<(), TransportError> {
        self.inner.transport.write_word(addr, value)
    }

    pub fn delay_us(&mut self, us: u32) {
        if us > 0 {
            self.inner.delay.delay_us(us);
        }
    }

    /// Probe `ready` until it returns true or the policy is exhausted.
    ///
    /// Returns `Ok(false)` on exhaustion so the caller can attach context to
    /// its own timeout error.
    pub fn poll<F>(&mut self, policy: &RetryPolicy, mut ready: F) -> Result<bool, TransportError>
    where
        F: FnMut(&mut T) -> Result<bool, TransportError>,
    {
        let inner = &mut *self.inner;
        for _ in 0..policy.max_attempts {
            if ready(&mut inner.transport)? {
                return Ok(true);
            }
            if policy.interval_us > 0 {
                inner.delay.delay_us(policy.interval_us);
            }
        }
        Ok(false)
    }
}
