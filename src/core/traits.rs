//! Capability traits the address space and dispatcher are built on.
//!
//! The link never touches device memory directly. A BAR slot holds a
//! [`RegionAccessor`] handed out by a [`RegionMapper`], and interrupts leave
//! the core through an [`IrqSink`].

use super::error::AccessError;

/// Address-space kind of a base-address region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarKind {
    /// Memory-mapped region, copied in bulk.
    #[default]
    Memory,
    /// I/O port region, copied one byte at a time.
    Io,
}

/// Bounded access to one mapped register window.
///
/// Offsets are relative to the start of the region. Implementations must
/// reject accesses that leave `0..size()` without partial effect.
pub trait RegionAccessor: Send + Sync {
    /// Size of the window in bytes.
    fn size(&self) -> u64;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), AccessError>;

    /// Copy `data` into the window starting at `offset`.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), AccessError>;

    /// Port-style read. Defaults to byte-wise [`read`](Self::read) calls.
    fn read_io(&self, offset: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        check_window(self.size(), offset, buf.len())?;
        for (i, byte) in buf.iter_mut().enumerate() {
            let mut one = [0u8; 1];
            self.read(offset + i as u64, &mut one)?;
            *byte = one[0];
        }
        Ok(())
    }

    /// Port-style write. Defaults to byte-wise [`write`](Self::write) calls.
    fn write_io(&mut self, offset: u64, data: &[u8]) -> Result<(), AccessError> {
        check_window(self.size(), offset, data.len())?;
        for (i, byte) in data.iter().enumerate() {
            self.write(offset + i as u64, std::slice::from_ref(byte))?;
        }
        Ok(())
    }

    /// Whether the window is backed by live storage.
    fn is_mapped(&self) -> bool {
        true
    }
}

/// Establishes the backing storage for a BAR when it is mapped.
pub trait RegionMapper: Send + Sync {
    /// Map `size` bytes at physical `base`.
    ///
    /// Returns [`AccessError::NoMemory`] when the mapping cannot be
    /// established.
    fn map(
        &self,
        base: u64,
        size: u64,
        kind: BarKind,
    ) -> Result<Box<dyn RegionAccessor>, AccessError>;
}

/// Receives interrupts raised by the peer.
///
/// Any `Fn(u32)` closure is a sink, so a channel can be plugged in with
/// `move |irq| { let _ = tx.send(irq); }`.
pub trait IrqSink: Send + Sync {
    /// Deliver interrupt `irq`.
    fn deliver(&self, irq: u32);
}

impl<F> IrqSink for F
where
    F: Fn(u32) + Send + Sync,
{
    fn deliver(&self, irq: u32) {
        self(irq)
    }
}

/// Check that `offset..offset+len` lies within a window of `size` bytes.
pub fn check_window(size: u64, offset: u64, len: usize) -> Result<(), AccessError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(AccessError::NoSuchAddress { addr: offset, len }),
    }
}
