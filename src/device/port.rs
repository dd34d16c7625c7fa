//! Port device: one accelerator slot and its AFU

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};

use tracing::{error, info};

use super::afu::{discover_afu, AfuDevice};
use super::board::CcipDevice;
use super::fme::{read_top_header, FmeDevice};
use crate::config::DriverConfig;
use crate::csr::{read_csr64, CsrBase};
use crate::dfl::{walk_feature_list, walk_partial, Feature, FeatureScope, FeatureSet};
use crate::error::CcipResult;
use crate::monitor::PortErrorState;
use crate::regs::port::{
    PortErrorFeature, PortHeader, PortPrFeature, PortStatus, SignalTapFeature, UmsgFeature,
};
use crate::regs::FeatureId;

/// A discovered, implemented port
#[derive(Debug)]
pub struct PortDevice {
    index: usize,
    base: CsrBase,
    header: PortHeader,
    max_nodes: usize,
    features: RwLock<Arc<FeatureSet>>,
    afu: Option<AfuDevice>,
    fme: Weak<FmeDevice>,
    board: OnceLock<Weak<CcipDevice>>,
    errors: Mutex<PortErrorState>,
}

impl PortDevice {
    /// Read the port header at `base`, discover its features and its AFU
    ///
    /// # Errors
    /// Returns `DeviceAbsent` for an all-ones header, `InvalidHeaderType` when
    /// the header is not an AFU-type DFH, and any walker error from the list
    pub fn discover(
        index: usize,
        base: CsrBase,
        fme: &Arc<FmeDevice>,
        config: &DriverConfig,
    ) -> CcipResult<Self> {
        let header = read_top_header::<PortHeader>(&base, "Port")?;
        let walk = walk_feature_list(&base, header.dfh, FeatureScope::Port, config.max_feature_nodes)?;
        let afu = discover_afu(&base, header.next_afu)?;
        info!(
            "Port {} at {:#x}: {} nodes, features {:?}, AFU {}",
            index,
            base.phys_addr(),
            walk.node_count(),
            walk.features.ids().collect::<Vec<_>>(),
            if afu.is_some() { "present" } else { "absent" }
        );
        Ok(Self {
            index,
            base,
            header,
            max_nodes: config.max_feature_nodes,
            features: RwLock::new(Arc::new(walk.features)),
            afu,
            fme: Arc::downgrade(fme),
            board: OnceLock::new(),
            errors: Mutex::new(PortErrorState::default()),
        })
    }

    /// Index of this port in the FME's `port_offsets[]`
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn base(&self) -> &CsrBase {
        &self.base
    }

    pub fn header(&self) -> &PortHeader {
        &self.header
    }

    /// Live port status register
    pub fn status(&self) -> PortStatus {
        PortStatus(read_csr64(&self.base, PortHeader::STATUS))
    }

    pub fn afu(&self) -> Option<&AfuDevice> {
        self.afu.as_ref()
    }

    pub fn fme(&self) -> Option<Arc<FmeDevice>> {
        self.fme.upgrade()
    }

    pub fn board(&self) -> Option<Arc<CcipDevice>> {
        self.board.get().and_then(Weak::upgrade)
    }

    pub(crate) fn attach_board(&self, board: Weak<CcipDevice>) {
        let _ = self.board.set(board);
    }

    pub fn features(&self) -> Arc<FeatureSet> {
        self.features
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn feature<T: Feature>(&self) -> Option<T> {
        self.features().get::<T>().copied()
    }

    pub fn error(&self) -> Option<PortErrorFeature> {
        self.feature()
    }

    pub fn umsg(&self) -> Option<UmsgFeature> {
        self.feature()
    }

    pub fn pr(&self) -> Option<PortPrFeature> {
        self.feature()
    }

    pub fn signal_tap(&self) -> Option<SignalTapFeature> {
        self.feature()
    }

    pub fn feature_base(&self, id: FeatureId) -> Option<CsrBase> {
        self.features().base(id).cloned()
    }

    /// Re-walk the feature list of a live port, logging any fault
    pub fn rescan(&self) -> usize {
        let header = self.base.read_block::<PortHeader>().map(|h| h.dfh);
        let (walk, fault) = match header {
            Ok(dfh) => walk_partial(&self.base, dfh, FeatureScope::Port, self.max_nodes),
            Err(e) => (Default::default(), Some(e)),
        };
        if let Some(e) = fault {
            error!("Port {} rescan stopped: {}", self.index, e);
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

    pub(crate) fn error_state(&self) -> MutexGuard<'_, PortErrorState> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
