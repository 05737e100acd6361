//! Heap-backed register windows.

use crate::core::{AccessError, BarKind, RegionAccessor, RegionMapper, check_window};

/// A zero-initialised register window in process memory.
#[derive(Debug, Clone)]
pub struct HeapRegion {
    data: Vec<u8>,
}

impl HeapRegion {
    /// Allocate `size` zeroed bytes, or fail with [`AccessError::NoMemory`].
    pub fn new(size: u64) -> Result<Self, AccessError> {
        let size = usize::try_from(size).map_err(|_| AccessError::NoMemory)?;
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| AccessError::NoMemory)?;
        data.resize(size, 0);
        Ok(Self { data })
    }
}

impl RegionAccessor for HeapRegion {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        check_window(self.size(), offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), AccessError> {
        check_window(self.size(), offset, data.len())?;
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Maps every BAR to a fresh [`HeapRegion`], up to an optional size cap.
#[derive(Debug, Clone, Default)]
pub struct HeapMapper {
    max_region_size: Option<u64>,
}

impl HeapMapper {
    /// Mapper without a size cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse regions larger than `max` bytes with `NoMemory`.
    pub fn with_max_region_size(max: u64) -> Self {
        Self {
            max_region_size: Some(max),
        }
    }
}

impl RegionMapper for HeapMapper {
    fn map(
        &self,
        _base: u64,
        size: u64,
        _kind: BarKind,
    ) -> Result<Box<dyn RegionAccessor>, AccessError> {
        if self.max_region_size.is_some_and(|max| size > max) {
            return Err(AccessError::NoMemory);
        }
        Ok(Box::new(HeapRegion::new(size)?))
    }
}
