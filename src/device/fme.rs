//! FPGA Management Engine device

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{error, info};

use crate::config::DriverConfig;
use crate::csr::{read_csr64, CsrBase};
use crate::dfl::{walk_feature_list, walk_partial, Feature, FeatureScope, FeatureSet};
use crate::error::{CcipError, CcipResult};
use crate::monitor::FmeErrorState;
use crate::regs::fme::{
    FmeHeader, FmePrFeature, GlobalErrorFeature, PerfFeature, PortOffset, PowerFeature,
    ThermalFeature,
};
use crate::regs::port::PortHeader;
use crate::regs::{Dfh, DfhType, FeatureId, RegisterBlock, ALL_ONES};

/// The FME of one board and its discovered features
#[derive(Debug)]
pub struct FmeDevice {
    base: CsrBase,
    header: FmeHeader,
    max_nodes: usize,
    features: RwLock<Arc<FeatureSet>>,
    errors: Mutex<FmeErrorState>,
}

impl FmeDevice {
    /// Read the FME header at `base` and discover its private features
    ///
    /// # Errors
    /// Returns `DeviceAbsent` for an all-ones header, `InvalidHeaderType` when
    /// the header is not an AFU-type DFH, and any walker error from the list
    pub fn discover(base: CsrBase, config: &DriverConfig) -> CcipResult<Self> {
        let header = read_top_header::<FmeHeader>(&base, "FME")?;
        let walk = walk_feature_list(&base, header.dfh, FeatureScope::Fme, config.max_feature_nodes)?;
        info!(
            "FME at {:#x}: {} nodes, features {:?}",
            base.phys_addr(),
            walk.node_count(),
            walk.features.ids().collect::<Vec<_>>()
        );
        Ok(Self {
            base,
            header,
            max_nodes: config.max_feature_nodes,
            features: RwLock::new(Arc::new(walk.features)),
            errors: Mutex::new(FmeErrorState::default()),
        })
    }

    pub fn base(&self) -> &CsrBase {
        &self.base
    }

    pub fn header(&self) -> &FmeHeader {
        &self.header
    }

    /// `port_offsets[index]`, re-read from the device
    pub fn port_offset(&self, index: usize) -> PortOffset {
        PortOffset(read_csr64(&self.base, FmeHeader::port_offset_csr(index)))
    }

    /// Snapshot of the discovered features
    pub fn features(&self) -> Arc<FeatureSet> {
        self.features
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn feature<T: Feature>(&self) -> Option<T> {
        self.features().get::<T>().copied()
    }

    pub fn thermal(&self) -> Option<ThermalFeature> {
        self.feature()
    }

    pub fn power(&self) -> Option<PowerFeature> {
        self.feature()
    }

    pub fn perf(&self) -> Option<PerfFeature> {
        self.feature()
    }

    pub fn global_error(&self) -> Option<GlobalErrorFeature> {
        self.feature()
    }

    pub fn pr(&self) -> Option<FmePrFeature> {
        self.feature()
    }

    /// Live base of feature `id`, if it was discovered
    pub fn feature_base(&self, id: FeatureId) -> Option<CsrBase> {
        self.features().base(id).cloned()
    }

    /// Re-walk the feature list of a live FME
    ///
    /// Faults are logged, never returned; features found before a fault are
    /// merged over the existing set. Returns the number of features held.
    pub fn rescan(&self) -> usize {
        let header = self.base.read_block::<FmeHeader>().map(|h| h.dfh);
        let (walk, fault) = match header {
            Ok(dfh) => walk_partial(&self.base, dfh, FeatureScope::Fme, self.max_nodes),
            Err(e) => (Default::default(), Some(e)),
        };
        if let Some(e) = fault {
            error!("FME rescan stopped: {}", e);
        }

        let mut guard = self
            .features
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut merged = FeatureSet::clone(&guard);
        merged.merge(walk.features);
        let count = merged.len();
        *guard = Arc::new(merged);
        count
    }

    pub(crate) fn error_state(&self) -> MutexGuard<'_, FmeErrorState> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Copy an FME or Port top-level header, checking presence and type
pub(crate) fn read_top_header<T>(base: &CsrBase, name: &'static str) -> CcipResult<T>
where
    T: RegisterBlock + HasDfh,
{
    if base.is_null() {
        return Err(CcipError::NullBase);
    }
    let header = base.read_block::<T>()?;
    let dfh = header.dfh();
    if dfh.csr() == ALL_ONES {
        return Err(CcipError::DeviceAbsent {
            offset: base.offset(),
        });
    }
    if dfh.kind() != Some(DfhType::Afu) {
        return Err(CcipError::InvalidHeaderType {
            header: name,
            found: dfh.type_field() as u8,
        });
    }
    Ok(header)
}

/// Top-level headers that start with a DFH
pub(crate) trait HasDfh {
    fn dfh(&self) -> Dfh;
}

impl HasDfh for FmeHeader {
    fn dfh(&self) -> Dfh {
        self.dfh
    }
}

impl HasDfh for PortHeader {
    fn dfh(&self) -> Dfh {
        self.dfh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BoardImage, FeatureChain, FME_BAR};

    fn fme_of(image: BoardImage) -> CcipResult<FmeDevice> {
        let board = image.build()?;
        FmeDevice::discover(board.bars().bar(FME_BAR)?, &DriverConfig::default())
    }

    #[test]
    fn test_no_private_features() -> CcipResult<()> {
        let fme = fme_of(BoardImage::new())?;
        assert!(fme.features().is_empty());
        assert!(fme.thermal().is_none());
        assert!(fme.pr().is_none());
        Ok(())
    }

    #[test]
    fn test_absent_and_wrong_type() -> CcipResult<()> {
        let absent = fme_of(BoardImage::new().with_fme_dfh(Dfh(ALL_ONES)));
        assert!(matches!(absent, Err(CcipError::DeviceAbsent { offset: 0 })));

        let private = fme_of(BoardImage::new().with_fme_dfh(Dfh::new(DfhType::Private, 0, 0, 0)));
        assert!(matches!(
            private,
            Err(CcipError::InvalidHeaderType { header: "FME", found: 3 })
        ));

        let null = FmeDevice::discover(CsrBase::null(), &DriverConfig::default());
        assert!(matches!(null, Err(CcipError::NullBase)));
        Ok(())
    }

    #[test]
    fn test_rescan_keeps_prefix_after_fault() -> CcipResult<()> {
        let board = BoardImage::new()
            .with_fme_features(
                FeatureChain::new()
                    .feature(0x1000, FeatureId::FmeThermal)
                    .feature(0x2000, FeatureId::FmeGlobalError),
            )
            .build()?;
        let fme = FmeDevice::discover(board.bars().bar(FME_BAR)?, &DriverConfig::default())?;
        assert_eq!(fme.features().len(), 2);

        // Thermal now points at a node with a BBB type
        let thermal = Dfh(board.fme.peek(0x1000));
        board.fme.poke(0x1000, thermal.with_next_offset(0x4000).csr());
        board.fme.poke(0x5000, Dfh::new(DfhType::Bbb, 0x5, 0, 0).csr());

        assert_eq!(fme.rescan(), 2);
        assert!(fme.global_error().is_some());
        Ok(())
    }
}
