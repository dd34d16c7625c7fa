//! 64-bit CSR access over mapped MMIO regions
//!
//! `read_csr64`/`write_csr64` are the only code paths that touch register
//! memory. A region is anything implementing [`MmioRegion`]: a real PCI BAR
//! (feature `pcie`) or the in-memory [`SimulatedMmio`](crate::sim::SimulatedMmio).

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{CcipError, CcipResult};
use crate::regs::{RegisterBlock, ALL_ONES, CSR_SIZE};

#[cfg(feature = "pcie")]
pub mod mapped;

/// Number of PCI base address registers
pub const MAX_BARS: usize = 6;

/// BAR whose offset 0 holds the FME header
pub const FME_BAR: usize = 0;

/// A byte-addressed MMIO window with volatile 64-bit access
///
/// Callers only pass 8-byte aligned offsets with `offset + 8 <= len()`;
/// [`CsrBase`] enforces this before delegating.
pub trait MmioRegion: Send + Sync + fmt::Debug {
    /// Length of the window in bytes
    fn len(&self) -> usize;

    fn read64(&self, offset: usize) -> u64;

    fn write64(&self, offset: usize, value: u64);

    /// Physical address of the window start, 0 when not backed by hardware
    fn phys_base(&self) -> u64 {
        0
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A base address inside a mapped region, or null
#[derive(Clone, Default)]
pub struct CsrBase {
    region: Option<Arc<dyn MmioRegion>>,
    offset: usize,
}

impl CsrBase {
    /// The null base: every read returns the all-ones sentinel
    pub const fn null() -> Self {
        Self {
            region: None,
            offset: 0,
        }
    }

    pub fn new(region: Arc<dyn MmioRegion>) -> Self {
        Self {
            region: Some(region),
            offset: 0,
        }
    }

    /// Base moved forward by `offset` bytes
    pub fn at(&self, offset: usize) -> Self {
        Self {
            region: self.region.clone(),
            offset: self.offset.saturating_add(offset),
        }
    }

    pub fn is_null(&self) -> bool {
        self.region.is_none()
    }

    /// Offset of this base from the start of its region
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes between this base and the end of its region
    pub fn window_len(&self) -> usize {
        self.region
            .as_ref()
            .map_or(0, |r| r.len().saturating_sub(self.offset))
    }

    /// Physical address of this base, 0 for null or simulated regions
    pub fn phys_addr(&self) -> u64 {
        self.region
            .as_ref()
            .map_or(0, |r| r.phys_base().wrapping_add(self.offset as u64))
    }

    /// Whether both bases address the same byte of the same region
    pub fn same_location(&self, other: &CsrBase) -> bool {
        match (&self.region, &other.region) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) && self.offset == other.offset,
            (None, None) => true,
            _ => false,
        }
    }

    fn locate(&self, offset: usize) -> CcipResult<(&Arc<dyn MmioRegion>, usize)> {
        let region = self.region.as_ref().ok_or(CcipError::NullBase)?;
        let abs = self.offset.checked_add(offset).ok_or(CcipError::OutOfRange {
            offset,
            len: region.len(),
        })?;
        if abs % CSR_SIZE != 0 {
            return Err(CcipError::Misaligned { offset: abs });
        }
        match abs.checked_add(CSR_SIZE) {
            Some(end) if end <= region.len() => Ok((region, abs)),
            _ => Err(CcipError::OutOfRange {
                offset: abs,
                len: region.len(),
            }),
        }
    }

    /// Read `count` consecutive CSRs into an owned buffer
    pub fn read_csrs(&self, count: usize) -> CcipResult<Vec<u64>> {
        let mut csrs = Vec::new();
        csrs.try_reserve_exact(count)
            .map_err(|_| CcipError::out_of_memory(format!("{count} CSR copy")))?;
        csrs.extend((0..count).map(|i| read_csr64(self, i * CSR_SIZE)));
        Ok(csrs)
    }

    /// Copy a fixed register block starting at this base
    pub fn read_block<T: RegisterBlock>(&self) -> CcipResult<T> {
        if self.is_null() {
            return Err(CcipError::NullBase);
        }
        let csrs = self.read_csrs(T::CSR_COUNT)?;
        Ok(T::from_csrs(&csrs))
    }
}

impl fmt::Debug for CsrBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => f
                .debug_struct("CsrBase")
                .field("region", region)
                .field("offset", &format_args!("{:#x}", self.offset))
                .finish(),
            None => f.write_str("CsrBase(null)"),
        }
    }
}

/// Read the 64-bit CSR at `base + offset`
///
/// Returns [`ALL_ONES`] when `base` is null or the access falls outside the
/// mapped window, the same value an unresponsive device reads back.
pub fn read_csr64(base: &CsrBase, offset: usize) -> u64 {
    match base.locate(offset) {
        Ok((region, abs)) => region.read64(abs),
        Err(CcipError::NullBase) => ALL_ONES,
        Err(e) => {
            warn!("CSR read failed: {}", e);
            ALL_ONES
        }
    }
}

/// Write `value` to the 64-bit CSR at `base + offset`
pub fn write_csr64(base: &CsrBase, offset: usize, value: u64) -> CcipResult<()> {
    let (region, abs) = base.locate(offset).map_err(|e| {
        warn!("CSR write of {:#x} failed: {}", value, e);
        e
    })?;
    region.write64(abs, value);
    Ok(())
}

/// The BAR windows of one PCI function
#[derive(Debug, Clone, Default)]
pub struct BarSet {
    bars: [CsrBase; MAX_BARS],
}

impl BarSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `region` as BAR `index`
    pub fn with_bar(mut self, index: usize, region: Arc<dyn MmioRegion>) -> CcipResult<Self> {
        let slot = self
            .bars
            .get_mut(index)
            .ok_or(CcipError::MissingBar { bar: index })?;
        *slot = CsrBase::new(region);
        Ok(self)
    }

    /// Base of BAR `index`, an error if it is not mapped
    pub fn bar(&self, index: usize) -> CcipResult<CsrBase> {
        match self.bars.get(index) {
            Some(base) if !base.is_null() => Ok(base.clone()),
            _ => Err(CcipError::MissingBar { bar: index }),
        }
    }

    /// Indices of the mapped BARs
    pub fn mapped(&self) -> impl Iterator<Item = usize> + '_ {
        self.bars
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_null())
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMmio;

    #[test]
    fn test_null_base_reads_all_ones() {
        let base = CsrBase::null();
        for offset in [0, 8, 0x1000, usize::MAX - 7] {
            assert_eq!(read_csr64(&base, offset), ALL_ONES);
        }
        assert!(matches!(write_csr64(&base, 0, 1), Err(CcipError::NullBase)));
    }

    #[test]
    fn test_read_write_relative_to_base() -> CcipResult<()> {
        let mmio = Arc::new(SimulatedMmio::new(0x100));
        let base = CsrBase::new(mmio.clone()).at(0x40);
        write_csr64(&base, 0x8, 0xDEAD_BEEF)?;
        assert_eq!(mmio.peek(0x48), 0xDEAD_BEEF);
        assert_eq!(read_csr64(&base, 0x8), 0xDEAD_BEEF);
        assert_eq!(base.window_len(), 0xC0);
        Ok(())
    }

    #[test]
    fn test_out_of_window_access() {
        let base = CsrBase::new(Arc::new(SimulatedMmio::new(0x40)));
        assert_eq!(read_csr64(&base, 0x40), ALL_ONES);
        assert!(matches!(
            write_csr64(&base, 0x40, 0),
            Err(CcipError::OutOfRange { offset: 0x40, len: 0x40 })
        ));
        assert!(matches!(
            write_csr64(&base, 0x4, 0),
            Err(CcipError::Misaligned { offset: 0x4 })
        ));
    }

    #[test]
    fn test_bar_set() -> CcipResult<()> {
        let bars = BarSet::new().with_bar(2, Arc::new(SimulatedMmio::new(0x10)))?;
        assert!(bars.bar(2).is_ok());
        assert!(matches!(bars.bar(0), Err(CcipError::MissingBar { bar: 0 })));
        assert!(matches!(bars.bar(9), Err(CcipError::MissingBar { bar: 9 })));
        assert_eq!(bars.mapped().collect::<Vec<_>>(), vec![2]);
        Ok(())
    }
}
