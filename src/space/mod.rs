//! Emulated device address space.
//!
//! A flat configuration buffer plus six independently mappable
//! base-address regions. Every access is bounds-checked and either applies
//! completely or not at all.

mod bar;
mod config;
mod heap;

pub use bar::*;
pub use config::*;
pub use heap::*;

use std::sync::Arc;

use crate::core::{AccessError, BarKind, DEFAULT_CONFIG_SIZE, RegionMapper};

/// Configuration space and BAR table of one virtual device.
pub struct AddressSpace {
    config: ConfigSpace,
    bars: BarTable,
}

impl AddressSpace {
    /// Create an address space with heap-backed BAR regions.
    pub fn new(config_size: usize) -> Self {
        Self::with_mapper(config_size, Arc::new(HeapMapper::new()))
    }

    /// Create an address space whose BARs are established by `mapper`.
    pub fn with_mapper(config_size: usize, mapper: Arc<dyn RegionMapper>) -> Self {
        Self {
            config: ConfigSpace::new(config_size),
            bars: BarTable::new(mapper),
        }
    }

    /// Size of the configuration buffer.
    pub fn config_size(&self) -> usize {
        self.config.size()
    }

    /// Read `buf.len()` bytes of configuration space at `offset`.
    pub fn config_read(&self, offset: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        self.config.read(offset, buf)
    }

    /// Write `data` to configuration space at `offset`.
    pub fn config_write(&self, offset: u64, data: &[u8]) -> Result<(), AccessError> {
        self.config.write(offset, data)
    }

    /// Read from the mapped BAR that contains `addr..addr+buf.len()`.
    pub fn mem_read(&self, addr: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        self.bars.read(addr, buf)
    }

    /// Write to the mapped BAR that contains `addr..addr+data.len()`.
    pub fn mem_write(&self, addr: u64, data: &[u8]) -> Result<(), AccessError> {
        self.bars.write(addr, data)
    }

    /// Map BAR `index`, replacing any existing mapping.
    pub fn bar_map(
        &self,
        index: usize,
        base: u64,
        size: u64,
        kind: BarKind,
    ) -> Result<(), AccessError> {
        self.bars.map(index, base, size, kind)
    }

    /// Unmap BAR `index`; no-op if it is not mapped.
    pub fn bar_unmap(&self, index: usize) -> Result<(), AccessError> {
        self.bars.unmap(index)
    }

    /// Snapshot of BAR `index`.
    pub fn bar_info(&self, index: usize) -> Result<Option<BarInfo>, AccessError> {
        self.bars.info(index)
    }

    /// Number of BARs with live backing storage.
    pub fn mapped_count(&self) -> usize {
        self.bars.mapped_count()
    }

    /// Unmap every BAR.
    pub fn unmap_all(&self) {
        self.bars.unmap_all()
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_SIZE)
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("config_size", &self.config.size())
            .field("mapped_bars", &self.bars.mapped_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_size() {
        let space = AddressSpace::default();
        assert_eq!(space.config_size(), 4096);
        assert_eq!(space.mapped_count(), 0);
    }

    #[test]
    fn test_config_and_mem_are_independent() {
        let space = AddressSpace::new(256);
        space.bar_map(0, 0, 256, BarKind::Memory).unwrap();

        space.config_write(0, &[0x11; 8]).unwrap();
        space.mem_write(0, &[0x22; 8]).unwrap();

        let mut cfg = [0u8; 8];
        let mut mem = [0u8; 8];
        space.config_read(0, &mut cfg).unwrap();
        space.mem_read(0, &mut mem).unwrap();
        assert_eq!(cfg, [0x11; 8]);
        assert_eq!(mem, [0x22; 8]);
    }
}
