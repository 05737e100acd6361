//! Configuration space buffer.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::core::AccessError;

/// Fixed-size, zero-initialised configuration buffer.
///
/// Every access is serialised by a single lock.
#[derive(Debug)]
pub struct ConfigSpace {
    data: Mutex<Vec<u8>>,
    size: usize,
}

impl ConfigSpace {
    /// Allocate a zeroed buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; size]),
            size,
        }
    }

    /// Buffer size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        let start = self.check(offset, buf.len())?;
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        buf.copy_from_slice(&data[start..start + buf.len()]);
        debug!(offset, len = buf.len(), "config read");
        Ok(())
    }

    /// Copy `data` into the buffer starting at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), AccessError> {
        let start = self.check(offset, data.len())?;
        let mut buf = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        buf[start..start + data.len()].copy_from_slice(data);
        debug!(offset, len = data.len(), "config write");
        Ok(())
    }

    fn check(&self, offset: u64, len: usize) -> Result<usize, AccessError> {
        let fits = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.size as u64);
        if !fits {
            warn!(offset, len, size = self.size, "config access out of bounds");
            return Err(AccessError::OutOfRange {
                offset,
                len,
                size: self.size,
            });
        }
        Ok(offset as usize)
    }
}
