//! Owned copies of discovered feature blocks, keyed by feature ID

use std::collections::BTreeMap;

use crate::csr::CsrBase;
use crate::error::CcipResult;
use crate::regs::fme::{FmePrFeature, GlobalErrorFeature, PerfFeature, PowerFeature, ThermalFeature};
use crate::regs::port::{PortErrorFeature, PortPrFeature, SignalTapFeature, UmsgFeature};
use crate::regs::{Dfh, FeatureId, RegisterBlock};

/// A register block that is discovered through a private DFH
pub trait Feature: RegisterBlock {
    const ID: FeatureId;

    fn wrap(self) -> FeatureBlock;

    fn peek(block: &FeatureBlock) -> Option<&Self>;
}

macro_rules! feature_blocks {
    ($($variant:ident($ty:ty) => $id:ident,)*) => {
        /// Copy of one discovered feature's registers
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum FeatureBlock {
            $($variant($ty),)*
        }

        impl FeatureBlock {
            /// Copy the block for `id` starting at `base`
            pub fn read(id: FeatureId, base: &CsrBase) -> CcipResult<Self> {
                Ok(match id {
                    $(FeatureId::$id => FeatureBlock::$variant(base.read_block::<$ty>()?),)*
                })
            }

            pub fn id(&self) -> FeatureId {
                match self {
                    $(FeatureBlock::$variant(_) => FeatureId::$id,)*
                }
            }

            pub fn dfh(&self) -> Dfh {
                match self {
                    $(FeatureBlock::$variant(block) => block.dfh,)*
                }
            }
        }

        $(
            impl Feature for $ty {
                const ID: FeatureId = FeatureId::$id;

                fn wrap(self) -> FeatureBlock {
                    FeatureBlock::$variant(self)
                }

                fn peek(block: &FeatureBlock) -> Option<&Self> {
                    match block {
                        FeatureBlock::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )*
    };
}

feature_blocks! {
    Thermal(ThermalFeature) => FmeThermal,
    Power(PowerFeature) => FmePower,
    Perf(PerfFeature) => FmeGlobalPerf,
    GlobalError(GlobalErrorFeature) => FmeGlobalError,
    FmePr(FmePrFeature) => FmePr,
    PortError(PortErrorFeature) => PortError,
    Umsg(UmsgFeature) => PortUmsg,
    PortPr(PortPrFeature) => PortPr,
    SignalTap(SignalTapFeature) => PortSignalTap,
}

/// A feature found during a walk
#[derive(Debug, Clone)]
pub struct DiscoveredFeature {
    /// Live location of the feature's DFH
    pub base: CsrBase,
    /// Offset of the DFH from the header the walk started at
    pub offset: usize,
    /// Registers as read during discovery
    pub block: FeatureBlock,
}

/// Discovered features of one FME or Port
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    features: BTreeMap<FeatureId, DiscoveredFeature>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a feature, replacing any earlier one with the same ID
    pub fn insert(&mut self, feature: DiscoveredFeature) -> Option<DiscoveredFeature> {
        self.features.insert(feature.block.id(), feature)
    }

    /// Registers of feature `T` as copied at discovery
    pub fn get<T: Feature>(&self) -> Option<&T> {
        self.features.get(&T::ID).and_then(|f| T::peek(&f.block))
    }

    pub fn discovered(&self, id: FeatureId) -> Option<&DiscoveredFeature> {
        self.features.get(&id)
    }

    /// Live base of feature `id`
    pub fn base(&self, id: FeatureId) -> Option<&CsrBase> {
        self.features.get(&id).map(|f| &f.base)
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.features.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.features.keys().copied()
    }

    /// Take every feature of `other`, overwriting entries with the same ID
    pub fn merge(&mut self, other: FeatureSet) {
        self.features.extend(other.features);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::DfhType;

    fn thermal(next: u32) -> DiscoveredFeature {
        let block = ThermalFeature {
            dfh: Dfh::new(DfhType::Private, FeatureId::FmeThermal as u16, 0, next),
            ..Default::default()
        };
        DiscoveredFeature {
            base: CsrBase::null(),
            offset: next as usize,
            block: block.wrap(),
        }
    }

    #[test]
    fn test_typed_lookup() {
        let mut set = FeatureSet::new();
        assert!(set.get::<ThermalFeature>().is_none());
        set.insert(thermal(0x10));
        assert!(set.get::<ThermalFeature>().is_some());
        assert!(set.get::<PowerFeature>().is_none());
        assert!(set.contains(FeatureId::FmeThermal));
    }

    #[test]
    fn test_duplicate_replaces() {
        let mut set = FeatureSet::new();
        assert!(set.insert(thermal(0x10)).is_none());
        let replaced = set.insert(thermal(0x20));
        assert_eq!(replaced.map(|f| f.offset), Some(0x10));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get::<ThermalFeature>().map(|t| t.dfh.next_offset()), Some(0x20));
    }

    #[test]
    fn test_block_id_roundtrip() {
        let block = SignalTapFeature::default().wrap();
        assert_eq!(block.id(), FeatureId::PortSignalTap);
        assert!(SignalTapFeature::peek(&block).is_some());
        assert!(UmsgFeature::peek(&block).is_none());
    }
}
