//! Base-address region table.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::core::{AccessError, BarKind, MAX_BARS, RegionAccessor, RegionMapper};

/// One configured BAR slot.
struct BarRegion {
    base: u64,
    size: u64,
    kind: BarKind,
    /// `None` for zero-sized bookkeeping entries.
    accessor: Option<Box<dyn RegionAccessor>>,
}

impl BarRegion {
    /// Offset of `addr..addr+len` within this region, if fully contained
    /// and backed by live storage.
    fn offset_of(&self, addr: u64, len: usize) -> Option<u64> {
        let accessor = self.accessor.as_ref()?;
        if !accessor.is_mapped() || addr < self.base {
            return None;
        }
        let end = addr.checked_add(len as u64)?;
        let limit = self.base.checked_add(self.size)?;
        (end <= limit).then(|| addr - self.base)
    }
}

/// Snapshot of a BAR slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarInfo {
    /// Physical base address.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
    /// Memory or I/O region.
    pub kind: BarKind,
    /// Whether live backing storage is attached.
    pub mapped: bool,
}

/// The six BAR slots of a device.
///
/// Each slot has its own reader/writer lock: reads share it, writes and
/// map/unmap take it exclusively, so a mapping cannot change under an
/// in-flight access.
pub struct BarTable {
    slots: [RwLock<Option<BarRegion>>; MAX_BARS],
    mapper: Arc<dyn RegionMapper>,
}

impl BarTable {
    /// Create an empty table.
    pub fn new(mapper: Arc<dyn RegionMapper>) -> Self {
        Self {
            slots: std::array::from_fn(|_| RwLock::new(None)),
            mapper,
        }
    }

    fn slot(&self, index: usize) -> Result<&RwLock<Option<BarRegion>>, AccessError> {
        self.slots.get(index).ok_or_else(|| {
            warn!(index, "invalid BAR number");
            AccessError::InvalidBar(index)
        })
    }

    /// Map `size` bytes at `base` into slot `index`.
    ///
    /// An existing mapping is released first. A zero `size` records the
    /// slot without establishing storage.
    pub fn map(
        &self,
        index: usize,
        base: u64,
        size: u64,
        kind: BarKind,
    ) -> Result<(), AccessError> {
        let slot = self.slot(index)?;
        if base.checked_add(size).is_none() {
            return Err(AccessError::InvalidArgument(format!(
                "BAR{index} range overflows: base={base:#x} size={size:#x}"
            )));
        }

        info!(index, base, size, ?kind, "mapping BAR");

        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            warn!(index, "BAR already mapped, unmapping first");
        }

        let accessor = if size > 0 {
            match self.mapper.map(base, size, kind) {
                Ok(accessor) => Some(accessor),
                Err(err) => {
                    warn!(index, %err, "failed to map BAR");
                    return Err(err);
                }
            }
        } else {
            None
        };

        *guard = Some(BarRegion {
            base,
            size,
            kind,
            accessor,
        });
        Ok(())
    }

    /// Clear slot `index`.
    pub fn unmap(&self, index: usize) -> Result<(), AccessError> {
        let slot = self.slot(index)?;
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            info!(index, "unmapped BAR");
        }
        Ok(())
    }

    /// Clear every slot.
    pub fn unmap_all(&self) {
        for index in 0..MAX_BARS {
            // Index is always in range here.
            let _ = self.unmap(index);
        }
    }

    /// Snapshot of slot `index`, `None` if it is empty.
    pub fn info(&self, index: usize) -> Result<Option<BarInfo>, AccessError> {
        let guard = self.slot(index)?.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.as_ref().map(|region| BarInfo {
            base: region.base,
            size: region.size,
            kind: region.kind,
            mapped: region.accessor.is_some(),
        }))
    }

    /// Number of slots with live storage.
    pub fn mapped_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .is_some_and(|region| region.accessor.is_some())
            })
            .count()
    }

    /// Read from the first mapped slot containing `addr..addr+buf.len()`.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), AccessError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
            let Some(region) = guard.as_ref() else {
                continue;
            };
            let Some(offset) = region.offset_of(addr, buf.len()) else {
                continue;
            };
            let Some(accessor) = region.accessor.as_ref() else {
                continue;
            };

            match region.kind {
                BarKind::Memory => accessor.read(offset, buf)?,
                BarKind::Io => accessor.read_io(offset, buf)?,
            }
            debug!(index, offset, len = buf.len(), "mem read");
            return Ok(());
        }

        warn!(addr, len = buf.len(), "mem read failed: no BAR contains range");
        Err(AccessError::NoSuchAddress {
            addr,
            len: buf.len(),
        })
    }

    /// Write to the first mapped slot containing `addr..addr+data.len()`.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<(), AccessError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
            let Some(region) = guard.as_mut() else {
                continue;
            };
            let Some(offset) = region.offset_of(addr, data.len()) else {
                continue;
            };
            let kind = region.kind;
            let Some(accessor) = region.accessor.as_mut() else {
                continue;
            };

            match kind {
                BarKind::Memory => accessor.write(offset, data)?,
                BarKind::Io => accessor.write_io(offset, data)?,
            }
            debug!(index, offset, len = data.len(), "mem write");
            return Ok(());
        }

        warn!(addr, len = data.len(), "mem write failed: no BAR contains range");
        Err(AccessError::NoSuchAddress {
            addr,
            len: data.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::HeapMapper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn table() -> BarTable {
        BarTable::new(Arc::new(HeapMapper::new()))
    }

    /// Region that tracks how many instances are alive.
    struct CountedRegion {
        data: Vec<u8>,
        live: Arc<AtomicUsize>,
        io_calls: Arc<AtomicUsize>,
    }

    impl Drop for CountedRegion {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl RegionAccessor for CountedRegion {
        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), AccessError> {
            crate::core::check_window(self.size(), offset, buf.len())?;
            let start = offset as usize;
            buf.copy_from_slice(&self.data[start..start + buf.len()]);
            Ok(())
        }

        fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), AccessError> {
            crate::core::check_window(self.size(), offset, data.len())?;
            let start = offset as usize;
            self.data[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn read_io(&self, offset: u64, buf: &mut [u8]) -> Result<(), AccessError> {
            self.io_calls.fetch_add(1, Ordering::SeqCst);
            self.read(offset, buf)
        }
    }

    struct CountingMapper {
        live: Arc<AtomicUsize>,
        io_calls: Arc<AtomicUsize>,
    }

    impl RegionMapper for CountingMapper {
        fn map(
            &self,
            _base: u64,
            size: u64,
            _kind: BarKind,
        ) -> Result<Box<dyn RegionAccessor>, AccessError> {
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountedRegion {
                data: vec![0; size as usize],
                live: self.live.clone(),
                io_calls: self.io_calls.clone(),
            }))
        }
    }

    #[test]
    fn test_invalid_index() {
        let bars = table();
        assert_eq!(
            bars.map(6, 0, 16, BarKind::Memory),
            Err(AccessError::InvalidBar(6))
        );
        assert_eq!(bars.unmap(6), Err(AccessError::InvalidBar(6)));
        assert!(bars.info(7).is_err());
    }

    #[test]
    fn test_access_requires_full_containment() {
        let bars = table();
        bars.map(0, 0x1000, 0x100, BarKind::Memory).unwrap();

        let mut buf = [0u8; 4];
        assert!(bars.read(0x1000, &mut buf).is_ok());
        assert!(bars.read(0x10FC, &mut buf).is_ok());
        assert_eq!(
            bars.read(0x10FD, &mut buf),
            Err(AccessError::NoSuchAddress { addr: 0x10FD, len: 4 })
        );
        assert!(bars.read(0x0FFF, &mut buf).is_err());
        assert!(bars.read(u64::MAX - 1, &mut buf).is_err());
    }

    #[test]
    fn test_range_straddling_two_bars_fails() {
        let bars = table();
        bars.map(0, 0x1000, 0x100, BarKind::Memory).unwrap();
        bars.map(1, 0x1100, 0x100, BarKind::Memory).unwrap();

        bars.write(0x10F0, &[1; 16]).unwrap();
        bars.write(0x1100, &[2; 16]).unwrap();

        let err = bars.write(0x10F8, &[0xFF; 16]).unwrap_err();
        assert!(matches!(err, AccessError::NoSuchAddress { .. }));

        // Neither side was touched.
        let mut low = [0u8; 16];
        let mut high = [0u8; 16];
        bars.read(0x10F0, &mut low).unwrap();
        bars.read(0x1100, &mut high).unwrap();
        assert_eq!(low, [1; 16]);
        assert_eq!(high, [2; 16]);
    }

    #[test]
    fn test_remap_releases_old_mapping() {
        let live = Arc::new(AtomicUsize::new(0));
        let bars = BarTable::new(Arc::new(CountingMapper {
            live: live.clone(),
            io_calls: Arc::new(AtomicUsize::new(0)),
        }));

        bars.map(2, 0x2000, 0x100, BarKind::Memory).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);

        bars.map(2, 0x8000, 0x40, BarKind::Memory).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1, "old region must be dropped");

        let info = bars.info(2).unwrap().unwrap();
        assert_eq!(info.base, 0x8000);
        assert_eq!(info.size, 0x40);
        assert!(info.mapped);
        assert_eq!(bars.mapped_count(), 1);

        let mut buf = [0u8; 1];
        assert!(bars.read(0x2000, &mut buf).is_err());
        assert!(bars.read(0x8000, &mut buf).is_ok());

        bars.unmap_all();
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(bars.mapped_count(), 0);
    }

    #[test]
    fn test_zero_size_is_bookkeeping_only() {
        let bars = table();
        bars.map(3, 0x4000, 0, BarKind::Memory).unwrap();

        let info = bars.info(3).unwrap().unwrap();
        assert_eq!(info.base, 0x4000);
        assert!(!info.mapped);
        assert_eq!(bars.mapped_count(), 0);

        let mut buf = [0u8; 0];
        assert!(bars.read(0x4000, &mut buf).is_err());

        bars.unmap(3).unwrap();
        assert_eq!(bars.info(3).unwrap(), None);
    }

    #[test]
    fn test_unmap_is_idempotent() {
        let bars = table();
        bars.unmap(0).unwrap();
        bars.map(0, 0, 16, BarKind::Memory).unwrap();
        bars.unmap(0).unwrap();
        bars.unmap(0).unwrap();
        assert_eq!(bars.mapped_count(), 0);
    }

    #[test]
    fn test_io_bar_uses_io_accessor() {
        let io_calls = Arc::new(AtomicUsize::new(0));
        let bars = BarTable::new(Arc::new(CountingMapper {
            live: Arc::new(AtomicUsize::new(0)),
            io_calls: io_calls.clone(),
        }));
        bars.map(0, 0x100, 0x10, BarKind::Memory).unwrap();
        bars.map(1, 0x200, 0x10, BarKind::Io).unwrap();

        let mut buf = [0u8; 4];
        bars.read(0x100, &mut buf).unwrap();
        assert_eq!(io_calls.load(Ordering::SeqCst), 0);
        bars.read(0x200, &mut buf).unwrap();
        assert_eq!(io_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_overflowing_map_rejected() {
        let bars = table();
        let err = bars.map(0, u64::MAX, 2, BarKind::Memory).unwrap_err();
        assert!(matches!(err, AccessError::InvalidArgument(_)));
        assert_eq!(bars.info(0).unwrap(), None);
    }
}
