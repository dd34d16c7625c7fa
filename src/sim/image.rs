//! Builders that lay out FME/Port headers and feature chains in simulated BARs

use std::sync::Arc;

pub use crate::csr::FME_BAR;

use super::SimulatedMmio;
use crate::csr::BarSet;
use crate::error::{CcipError, CcipResult};
use crate::regs::fme::{FabricCapability, FmeHeader, PortOffset, MAX_PORTS};
use crate::regs::port::{PortCapability, PortHeader};
use crate::regs::{AfuHeader, Dfh, DfhType, FeatureId, Guid, NextAfu, ALL_ONES, CSR_SIZE};

/// Size of the simulated FME BAR
pub const FME_WINDOW: usize = 0x8_0000;
/// Bytes reserved per port inside the port BAR
pub const PORT_WINDOW: usize = 0x4_0000;
/// BAR holding every simulated port
pub const PORT_BAR: usize = 2;

const DEFAULT_AFU_OFFSET: usize = 0x2_0000;
const EOL_NEXT_OFFSET: u64 = 0x1000;

/// How the last node of a chain marks the end of the list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Termination {
    /// Older format: `next_DFH_offset == 0`
    #[default]
    ZeroOffset,
    /// Newer format: `eol == 1` with a nonzero next offset left in place
    EndOfList,
}

#[derive(Debug, Clone)]
struct ChainNode {
    offset: usize,
    dfh: Dfh,
    payload: Vec<u64>,
}

/// A feature chain laid out at offsets relative to its enclosing header
#[derive(Debug, Clone, Default)]
pub struct FeatureChain {
    nodes: Vec<ChainNode>,
    termination: Termination,
}

impl FeatureChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node with an arbitrary header; its next offset is filled in on write
    pub fn node(mut self, offset: usize, dfh: Dfh) -> Self {
        self.nodes.push(ChainNode {
            offset,
            dfh,
            payload: Vec::new(),
        });
        self
    }

    /// Append a private, revision 0 feature
    pub fn feature(self, offset: usize, id: FeatureId) -> Self {
        self.revised(offset, id, 0)
    }

    /// Append a private feature with the given revision
    pub fn revised(self, offset: usize, id: FeatureId, revision: u8) -> Self {
        self.node(offset, Dfh::new(DfhType::Private, id as u16, revision, 0))
    }

    /// Registers following the DFH of the most recently added node
    pub fn payload(mut self, csrs: &[u64]) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.payload = csrs.to_vec();
        }
        self
    }

    pub fn terminate_with(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    /// Offset of the first node, 0 for an empty chain
    pub fn first_offset(&self) -> usize {
        self.nodes.first().map_or(0, |n| n.offset)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Write the chain and point the header at `header_offset` to its first node
    pub fn write(&self, mmio: &SimulatedMmio, header_offset: usize) -> CcipResult<()> {
        let mut prev = 0;
        for node in &self.nodes {
            if node.offset <= prev || node.offset % CSR_SIZE != 0 {
                return Err(CcipError::invalid_state(format!(
                    "chain node at {:#x} does not follow {:#x}",
                    node.offset, prev
                )));
            }
            prev = node.offset;
        }

        for (i, node) in self.nodes.iter().enumerate() {
            let dfh = match self.nodes.get(i + 1) {
                Some(next) => node.dfh.with_next_offset((next.offset - node.offset) as u64),
                None => match self.termination {
                    Termination::ZeroOffset => node.dfh.with_next_offset(0),
                    Termination::EndOfList => {
                        node.dfh.with_next_offset(EOL_NEXT_OFFSET).terminated()
                    }
                },
            };
            let at = header_offset + node.offset;
            mmio.poke(at, dfh.csr());
            mmio.poke_block(at + CSR_SIZE, &node.payload);
        }

        let header = Dfh(mmio.peek(header_offset)).with_next_offset(self.first_offset() as u64);
        mmio.poke(header_offset, header.csr());
        Ok(())
    }
}

/// Contents of one `port_offsets[]` slot
#[derive(Debug, Clone)]
pub struct PortImage {
    features: FeatureChain,
    afu: Option<Guid>,
    afu_offset: usize,
    implemented: bool,
}

impl Default for PortImage {
    fn default() -> Self {
        Self {
            features: FeatureChain::new(),
            afu: None,
            afu_offset: DEFAULT_AFU_OFFSET,
            implemented: true,
        }
    }
}

impl PortImage {
    /// An implemented port with no features and no AFU loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot whose `port_imp` bit is clear
    pub fn unimplemented() -> Self {
        Self {
            implemented: false,
            ..Self::default()
        }
    }

    pub fn with_features(mut self, features: FeatureChain) -> Self {
        self.features = features;
        self
    }

    pub fn with_afu(mut self, guid: Guid) -> Self {
        self.afu = Some(guid);
        self
    }

    pub fn with_afu_offset(mut self, offset: usize) -> Self {
        self.afu_offset = offset;
        self
    }
}

/// Layout of a whole board: FME in BAR 0, ports in BAR 2
#[derive(Debug, Clone, Default)]
pub struct BoardImage {
    fme_guid: Guid,
    capability: FabricCapability,
    fme_features: FeatureChain,
    fme_dfh: Option<Dfh>,
    ports: Vec<PortImage>,
}

impl BoardImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fme_guid(mut self, guid: Guid) -> Self {
        self.fme_guid = guid;
        self
    }

    pub fn with_capability(mut self, capability: FabricCapability) -> Self {
        self.capability = capability;
        self
    }

    pub fn with_fme_features(mut self, features: FeatureChain) -> Self {
        self.fme_features = features;
        self
    }

    /// Write `dfh` verbatim as the FME header DFH
    pub fn with_fme_dfh(mut self, dfh: Dfh) -> Self {
        self.fme_dfh = Some(dfh);
        self
    }

    /// Add the next port slot
    pub fn with_port(mut self, port: PortImage) -> Self {
        self.ports.push(port);
        self
    }

    /// Write the layout into fresh simulated BARs
    pub fn build(&self) -> CcipResult<SimulatedBoard> {
        if self.ports.len() > MAX_PORTS {
            return Err(CcipError::invalid_state(format!(
                "{} ports exceed the {} port offset slots",
                self.ports.len(),
                MAX_PORTS
            )));
        }

        let fme = Arc::new(SimulatedMmio::new(FME_WINDOW));
        let ports = Arc::new(SimulatedMmio::new(PORT_WINDOW * MAX_PORTS));

        fme.poke(FmeHeader::DFH, Dfh::new(DfhType::Afu, 0, 0, 0).csr());
        fme.poke(FmeHeader::AFU_ID_L, self.fme_guid.low());
        fme.poke(FmeHeader::AFU_ID_H, self.fme_guid.high());
        fme.poke(FmeHeader::CAPABILITY, self.capability.csr());
        self.fme_features.write(&fme, 0)?;
        if let Some(dfh) = self.fme_dfh {
            fme.poke(FmeHeader::DFH, dfh.csr());
        }

        for (index, port) in self.ports.iter().enumerate() {
            let base = index * PORT_WINDOW;
            let entry = PortOffset(0)
                .with_port_offset(base as u64)
                .with_port_bar(PORT_BAR as u64)
                .with_port_imp(u64::from(port.implemented));
            fme.poke(FmeHeader::port_offset_csr(index), entry.csr());
            if !port.implemented {
                continue;
            }
            write_port(&ports, base, index, port)?;
        }

        let bars = BarSet::new()
            .with_bar(FME_BAR, fme.clone())?
            .with_bar(PORT_BAR, ports.clone())?;
        Ok(SimulatedBoard { fme, ports, bars })
    }
}

fn write_port(mmio: &SimulatedMmio, base: usize, index: usize, port: &PortImage) -> CcipResult<()> {
    mmio.poke(base + PortHeader::DFH, Dfh::new(DfhType::Afu, 0, 0, 0).csr());
    mmio.poke(
        base + PortHeader::NEXT_AFU,
        NextAfu(0).with_afu_id_offset(port.afu_offset as u64).csr(),
    );
    mmio.poke(
        base + PortHeader::CAPABILITY,
        PortCapability(0).with_port_id(index as u64).csr(),
    );
    port.features.write(mmio, base)?;

    let afu = base + port.afu_offset;
    match port.afu {
        Some(guid) => {
            mmio.poke(afu + AfuHeader::DFH, Dfh::new(DfhType::Afu, 0, 0, 0).csr());
            mmio.poke(afu + AfuHeader::AFU_ID_L, guid.low());
            mmio.poke(afu + AfuHeader::AFU_ID_H, guid.high());
        }
        None => mmio.poke(afu + AfuHeader::DFH, ALL_ONES),
    }
    Ok(())
}

/// Simulated BARs produced by [`BoardImage::build`]
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    pub fme: Arc<SimulatedMmio>,
    pub ports: Arc<SimulatedMmio>,
    bars: BarSet,
}

impl SimulatedBoard {
    pub fn bars(&self) -> BarSet {
        self.bars.clone()
    }

    /// Offset of port `index`'s header inside the port BAR
    pub const fn port_base(index: usize) -> usize {
        index * PORT_WINDOW
    }
}
