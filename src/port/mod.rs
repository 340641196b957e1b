//! Host port pool.
//!
//! The driver hands one port from this pool to every port a container image
//! exposes. Ownership is recorded on the container itself (see
//! [`crate::docker::PORTS_LABEL`]), so after a controller restart the pool is
//! rebuilt with [`PortAllocator::reserve`] before anything new is allocated.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// Default pool: 8900 through 8998 inclusive.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 8900..=8998;

#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    free: BTreeSet<u16>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        let free = range.clone().collect();
        Self { range, free }
    }

    /// Take a port from the pool.
    ///
    /// A free `preferred` port is always honoured; otherwise the highest free
    /// port is handed out.
    pub fn allocate(&mut self, preferred: Option<u16>) -> Result<u16> {
        if let Some(port) = preferred {
            if self.free.remove(&port) {
                return Ok(port);
            }
        }
        self.free.pop_last().ok_or(Error::ExhaustedPool {
            capacity: self.capacity(),
        })
    }

    /// Return a port to the pool. Releasing a port that is already free or
    /// outside the range is a no-op.
    pub fn release(&mut self, port: u16) {
        if self.range.contains(&port) {
            self.free.insert(port);
        }
    }

    /// Mark a port held by a surviving container as allocated.
    ///
    /// Unlike `allocate(Some(port))` this never falls back to another port.
    /// Returns whether the port was free before the call.
    pub fn reserve(&mut self, port: u16) -> bool {
        self.free.remove(&port)
    }

    pub fn is_free(&self, port: u16) -> bool {
        self.free.contains(&port)
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.range.clone().count()
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}
