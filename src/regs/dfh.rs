//! Device Feature Header and AFU identification registers

use std::fmt;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use super::RegisterBlock;

/// Device Feature Header type field, bits [63:60]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum DfhType {
    Reserved = 0x0,
    Afu = 0x1,
    /// Basic Building Block
    Bbb = 0x2,
    Private = 0x3,
}

/// Feature IDs of the private features nested under an FME or Port header
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum FeatureId {
    FmeThermal = 0x1,
    FmePower = 0x2,
    FmeGlobalPerf = 0x3,
    FmeGlobalError = 0x4,
    FmePr = 0x5,
    PortError = 0x10,
    PortUmsg = 0x11,
    PortPr = 0x12,
    PortSignalTap = 0x13,
}

impl FeatureId {
    /// Human-readable feature name
    pub const fn name(&self) -> &'static str {
        match self {
            FeatureId::FmeThermal => "FME thermal management",
            FeatureId::FmePower => "FME power management",
            FeatureId::FmeGlobalPerf => "FME global performance",
            FeatureId::FmeGlobalError => "FME global error",
            FeatureId::FmePr => "FME partial reconfiguration",
            FeatureId::PortError => "Port error",
            FeatureId::PortUmsg => "Port UMSG",
            FeatureId::PortPr => "Port partial reconfiguration",
            FeatureId::PortSignalTap => "Port signal tap",
        }
    }

    /// True for features that live under the FME header
    pub const fn is_fme(&self) -> bool {
        (*self as u16) < 0x10
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.name(), *self as u16)
    }
}

csr_register! {
    /// Device Feature Header CSR
    pub struct Dfh {
        feature_id / with_feature_id: 0, 12;
        feature_rev / with_feature_rev: 12, 4;
        /// Byte offset from this header to the next one
        next_offset / with_next_offset: 16, 24;
        /// End of list, newer header format only
        eol / with_eol: 40, 1;
        type_field / with_type_field: 60, 4;
    }
}

impl Dfh {
    /// Build a header from its decoded parts
    pub const fn new(kind: DfhType, feature_id: u16, revision: u8, next_offset: u32) -> Self {
        Dfh(0)
            .with_type_field(kind as u64)
            .with_feature_id(feature_id as u64)
            .with_feature_rev(revision as u64)
            .with_next_offset(next_offset as u64)
    }

    /// Decoded type field, `None` for undefined encodings
    pub fn kind(&self) -> Option<DfhType> {
        DfhType::from_u64(self.type_field())
    }

    /// Decoded feature ID, `None` for IDs this driver does not know
    pub fn feature(&self) -> Option<FeatureId> {
        FeatureId::from_u64(self.feature_id())
    }

    /// Whether the walk stops after this node
    pub const fn is_end_of_list(&self) -> bool {
        self.next_offset() == 0 || self.eol() == 1
    }

    /// Set the end-of-list bit
    pub const fn terminated(self) -> Self {
        self.with_eol(1)
    }
}

csr_register! {
    /// AFU ID low CSR
    pub struct AfuIdL {
        afu_id_l / with_afu_id_l: 0, 64;
    }
}

csr_register! {
    /// AFU ID high CSR
    pub struct AfuIdH {
        afu_id_h / with_afu_id_h: 0, 64;
    }
}

csr_register! {
    /// Next AFU offset CSR
    pub struct NextAfu {
        /// Byte offset of the AFU header from the enclosing header
        afu_id_offset / with_afu_id_offset: 0, 24;
    }
}

csr_register! {
    /// Scratch pad CSR
    pub struct Scratchpad {
        scratch_pad / with_scratch_pad: 0, 64;
    }
}

/// 128-bit AFU GUID assembled from the low/high ID registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(pub u128);

impl Guid {
    pub const fn from_parts(low: AfuIdL, high: AfuIdH) -> Self {
        Guid(((high.0 as u128) << 64) | low.0 as u128)
    }

    pub const fn low(&self) -> u64 {
        self.0 as u64
    }

    pub const fn high(&self) -> u64 {
        (self.0 >> 64) as u64
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// AFU header: the first four CSRs of every AFU-type region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AfuHeader {
    pub dfh: Dfh,
    pub afu_id_l: AfuIdL,
    pub afu_id_h: AfuIdH,
    pub next_afu: NextAfu,
}

impl AfuHeader {
    pub const DFH: usize = 0x00;
    pub const AFU_ID_L: usize = 0x08;
    pub const AFU_ID_H: usize = 0x10;
    pub const NEXT_AFU: usize = 0x18;

    pub fn guid(&self) -> Guid {
        Guid::from_parts(self.afu_id_l, self.afu_id_h)
    }
}

impl RegisterBlock for AfuHeader {
    const CSR_COUNT: usize = 4;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            afu_id_l: AfuIdL(csrs[1]),
            afu_id_h: AfuIdH(csrs[2]),
            next_afu: NextAfu(csrs[3]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dfh_bit_positions() {
        let dfh = Dfh(0x3000_0100_0100_2013);
        assert_eq!(dfh.feature_id(), 0x013);
        assert_eq!(dfh.feature_rev(), 0x2);
        assert_eq!(dfh.next_offset(), 0x00_0100);
        assert_eq!(dfh.eol(), 1);
        assert_eq!(dfh.kind(), Some(DfhType::Private));
        assert_eq!(dfh.feature(), Some(FeatureId::PortSignalTap));
    }

    #[test]
    fn test_dfh_builder_matches_layout() {
        let dfh = Dfh::new(DfhType::Private, 0x4, 0, 0x1000);
        assert_eq!(dfh.csr(), (0x3u64 << 60) | (0x1000 << 16) | 0x4);
        assert!(!dfh.is_end_of_list());
        assert!(dfh.terminated().is_end_of_list());
        assert!(Dfh::new(DfhType::Private, 0x4, 0, 0).is_end_of_list());
    }

    #[test]
    fn test_unknown_encodings() {
        assert_eq!(Dfh(0xF << 60).kind(), None);
        assert_eq!(Dfh(0x7FF).feature(), None);
        assert_eq!(Dfh(u64::MAX).next_offset(), 0xFF_FFFF);
    }

    #[test]
    fn test_guid_format() {
        let guid = Guid::from_parts(AfuIdL(0x9AB3_0C76_6F3B_19E0), AfuIdH(0xC000_C966_0D82_4272));
        assert_eq!(guid.to_string(), "c000c966-0d82-4272-9ab3-0c766f3b19e0");
        assert_eq!(guid.low(), 0x9AB3_0C76_6F3B_19E0);
        assert_eq!(guid.high(), 0xC000_C966_0D82_4272);
    }

    #[test]
    fn test_feature_scope() {
        assert!(FeatureId::FmePr.is_fme());
        assert!(!FeatureId::PortPr.is_fme());
    }
}
