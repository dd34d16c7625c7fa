//! Device Feature List walker
//!
//! A feature list is a singly linked chain of private DFHs hanging off an
//! FME or Port header. Each node's `next_DFH_offset` is relative to the node
//! itself. The walker copies every known revision 0 block into an owned
//! [`FeatureSet`]; later duplicates replace earlier ones.

use tracing::{debug, trace, warn};

use crate::csr::{read_csr64, CsrBase};
use crate::error::{CcipError, CcipResult};
use crate::regs::{Dfh, DfhType, FeatureId};

mod features;

pub use features::{DiscoveredFeature, Feature, FeatureBlock, FeatureSet};

/// Default cap on the number of nodes in one feature list
pub const DEFAULT_MAX_NODES: usize = 64;

/// Which header a feature list hangs off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureScope {
    Fme,
    Port,
}

impl FeatureScope {
    /// Whether `id` is a feature this scope knows how to decode
    pub fn admits(&self, id: FeatureId) -> bool {
        match self {
            FeatureScope::Fme => id.is_fme(),
            FeatureScope::Port => !id.is_fme(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeatureScope::Fme => "FME",
            FeatureScope::Port => "Port",
        }
    }
}

/// What the walker did with one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Populated(FeatureId),
    /// Nonzero `Feature_rev`; nothing recorded
    SkippedRevision(u8),
    /// Feature ID not known for this scope; nothing recorded
    UnknownFeature(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeVisit {
    /// Offset of the node from the header the walk started at
    pub offset: usize,
    pub dfh: Dfh,
    pub outcome: NodeOutcome,
}

/// Result of walking one feature list
#[derive(Debug, Clone, Default)]
pub struct DflWalk {
    pub visited: Vec<NodeVisit>,
    pub features: FeatureSet,
}

impl DflWalk {
    pub fn node_count(&self) -> usize {
        self.visited.len()
    }
}

/// Walk the feature list of the header at `base`
///
/// `header` is the DFH already read at `base`. A header whose next offset is
/// zero (or whose `eol` bit is set) has no features and yields an empty walk.
/// Any node whose type is not private aborts the walk with a structural error.
pub fn walk_feature_list(
    base: &CsrBase,
    header: Dfh,
    scope: FeatureScope,
    max_nodes: usize,
) -> CcipResult<DflWalk> {
    let (walk, fault) = walk_partial(base, header, scope, max_nodes);
    match fault {
        Some(e) => Err(e),
        None => Ok(walk),
    }
}

/// Walk as far as possible, returning what was found before any fault
///
/// Used for rescans of live devices, where a fault is logged but the features
/// found ahead of it remain usable.
pub fn walk_partial(
    base: &CsrBase,
    header: Dfh,
    scope: FeatureScope,
    max_nodes: usize,
) -> (DflWalk, Option<CcipError>) {
    let mut walk = DflWalk::default();
    if header.is_end_of_list() {
        debug!("{} header has no private features", scope.name());
        return (walk, None);
    }

    let mut cursor = header.next_offset() as usize;
    loop {
        if walk.visited.len() >= max_nodes {
            return (walk, Some(CcipError::FeatureListTooLong { limit: max_nodes }));
        }
        let node = base.at(cursor);
        let dfh = Dfh(read_csr64(&node, 0));

        if dfh.kind() != Some(DfhType::Private) {
            warn!(
                "{} feature list: unexpected DFH type {:#x} at offset {:#x}",
                scope.name(),
                dfh.type_field(),
                cursor
            );
            let err = CcipError::InvalidFeatureType {
                offset: cursor,
                found: dfh.type_field() as u8,
            };
            return (walk, Some(err));
        }

        let outcome = match visit(&node, dfh, scope) {
            Ok(Some(block)) => {
                let id = block.id();
                let replaced = walk.features.insert(DiscoveredFeature {
                    base: node,
                    offset: cursor,
                    block,
                });
                if let Some(old) = replaced {
                    debug!("{} at {:#x} replaces copy at {:#x}", id, cursor, old.offset);
                }
                NodeOutcome::Populated(id)
            }
            Ok(None) if dfh.feature_rev() != 0 => NodeOutcome::SkippedRevision(dfh.feature_rev() as u8),
            Ok(None) => NodeOutcome::UnknownFeature(dfh.feature_id() as u16),
            Err(e) => return (walk, Some(e)),
        };

        if walk.visited.try_reserve(1).is_err() {
            return (walk, Some(CcipError::out_of_memory("feature list visit log")));
        }
        walk.visited.push(NodeVisit {
            offset: cursor,
            dfh,
            outcome,
        });

        if dfh.is_end_of_list() {
            trace!("{} feature list ends at {:#x}", scope.name(), cursor);
            return (walk, None);
        }
        cursor += dfh.next_offset() as usize;
    }
}

/// Decode one private node, `None` when it is skipped
fn visit(node: &CsrBase, dfh: Dfh, scope: FeatureScope) -> CcipResult<Option<FeatureBlock>> {
    if dfh.feature_rev() != 0 {
        debug!(
            "Skipping feature {:#x} with unsupported revision {}",
            dfh.feature_id(),
            dfh.feature_rev()
        );
        return Ok(None);
    }
    match dfh.feature().filter(|id| scope.admits(*id)) {
        Some(id) => {
            trace!("Found {} at {:#x}", id, node.offset());
            FeatureBlock::read(id, node).map(Some)
        }
        None => {
            warn!(
                "Unknown {} feature ID {:#x}, continuing",
                scope.name(),
                dfh.feature_id()
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::fme::{PowerFeature, ThermalFeature};
    use crate::sim::{FeatureChain, SimulatedMmio, Termination};
    use proptest::prelude::*;
    use std::sync::Arc;

    const FEATURE_STRIDE: usize = 0x100;

    fn header_base(chain: &FeatureChain) -> CcipResult<(CsrBase, Dfh)> {
        let mmio = Arc::new(SimulatedMmio::new(0x10_0000));
        mmio.poke(0, Dfh::new(DfhType::Afu, 0, 0, 0).csr());
        chain.write(&mmio, 0)?;
        let header = Dfh(mmio.peek(0));
        Ok((CsrBase::new(mmio), header))
    }

    fn walk(chain: &FeatureChain, scope: FeatureScope) -> CcipResult<DflWalk> {
        let (base, header) = header_base(chain)?;
        walk_feature_list(&base, header, scope, DEFAULT_MAX_NODES)
    }

    #[test]
    fn test_empty_list() -> CcipResult<()> {
        let result = walk(&FeatureChain::new(), FeatureScope::Fme)?;
        assert_eq!(result.node_count(), 0);
        assert!(result.features.is_empty());
        Ok(())
    }

    #[test]
    fn test_offsets_relative_to_current_node() -> CcipResult<()> {
        let chain = FeatureChain::new()
            .feature(0x1000, FeatureId::FmeThermal)
            .feature(0x1800, FeatureId::FmePower)
            .feature(0x4000, FeatureId::FmeGlobalError);
        let result = walk(&chain, FeatureScope::Fme)?;
        let offsets: Vec<usize> = result.visited.iter().map(|v| v.offset).collect();
        assert_eq!(offsets, vec![0x1000, 0x1800, 0x4000]);
        assert_eq!(result.features.len(), 3);
        Ok(())
    }

    #[test]
    fn test_payload_copied() -> CcipResult<()> {
        let chain = FeatureChain::new()
            .feature(0x100, FeatureId::FmeThermal)
            .payload(&[0x1234, 0x8000_0000, 0]);
        let result = walk(&chain, FeatureScope::Fme)?;
        let thermal = result.features.get::<ThermalFeature>();
        assert_eq!(thermal.map(|t| t.threshold.csr()), Some(0x1234));
        Ok(())
    }

    #[test]
    fn test_unknown_id_and_scope_mismatch_continue() -> CcipResult<()> {
        let chain = FeatureChain::new()
            .node(0x100, Dfh::new(DfhType::Private, 0x7FF, 0, 0))
            .feature(0x200, FeatureId::PortError)
            .feature(0x300, FeatureId::FmePower);
        let result = walk(&chain, FeatureScope::Fme)?;
        assert_eq!(result.node_count(), 3);
        assert_eq!(result.visited[0].outcome, NodeOutcome::UnknownFeature(0x7FF));
        assert_eq!(result.visited[1].outcome, NodeOutcome::UnknownFeature(0x10));
        assert!(result.features.get::<PowerFeature>().is_some());
        Ok(())
    }

    #[test]
    fn test_eol_terminates() -> CcipResult<()> {
        let chain = FeatureChain::new()
            .feature(0x100, FeatureId::PortError)
            .feature(0x200, FeatureId::PortUmsg)
            .terminate_with(Termination::EndOfList);
        let result = walk(&chain, FeatureScope::Port)?;
        assert_eq!(result.node_count(), 2);
        Ok(())
    }

    #[test]
    fn test_node_cap() -> CcipResult<()> {
        let mut chain = FeatureChain::new();
        for i in 1..=8 {
            chain = chain.feature(i * FEATURE_STRIDE, FeatureId::PortUmsg);
        }
        let (base, header) = header_base(&chain)?;
        let result = walk_feature_list(&base, header, FeatureScope::Port, 4);
        assert!(matches!(result, Err(CcipError::FeatureListTooLong { limit: 4 })));
        assert!(walk_feature_list(&base, header, FeatureScope::Port, 8).is_ok());
        Ok(())
    }

    #[test]
    fn test_runaway_into_absent_region() -> CcipResult<()> {
        let mmio = Arc::new(SimulatedMmio::new(0x400));
        mmio.poke(0, Dfh::new(DfhType::Afu, 0, 0, 0x100).csr());
        mmio.poke(0x100, Dfh::new(DfhType::Private, 0x10, 0, 0x1000).csr());
        let base = CsrBase::new(mmio);
        let result = walk_feature_list(&base, Dfh(read_csr64(&base, 0)), FeatureScope::Port, 64);
        assert!(matches!(
            result,
            Err(CcipError::InvalidFeatureType { offset: 0x1100, found: 0xF })
        ));
        Ok(())
    }

    #[test]
    fn test_partial_walk_keeps_prefix() -> CcipResult<()> {
        let chain = FeatureChain::new()
            .feature(0x100, FeatureId::PortError)
            .node(0x200, Dfh::new(DfhType::Bbb, 0x11, 0, 0))
            .feature(0x300, FeatureId::PortPr);
        let (base, header) = header_base(&chain)?;
        let (partial, fault) = walk_partial(&base, header, FeatureScope::Port, 64);
        assert!(fault.map_or(false, |e| e.is_structural()));
        assert_eq!(partial.features.ids().collect::<Vec<_>>(), vec![FeatureId::PortError]);
        Ok(())
    }

    /// One generated node: (feature id, revision)
    fn port_node() -> impl Strategy<Value = (FeatureId, u8)> {
        (
            prop::sample::select(vec![
                FeatureId::PortError,
                FeatureId::PortUmsg,
                FeatureId::PortPr,
                FeatureId::PortSignalTap,
            ]),
            prop_oneof![4 => Just(0u8), 1 => 1u8..16],
        )
    }

    fn chain_of(nodes: &[(FeatureId, u8)], termination: Termination) -> FeatureChain {
        nodes
            .iter()
            .enumerate()
            .fold(FeatureChain::new().terminate_with(termination), |chain, (i, (id, rev))| {
                chain.revised((i + 1) * FEATURE_STRIDE, *id, *rev)
            })
    }

    proptest! {
        #[test]
        fn prop_visits_every_node(
            nodes in prop::collection::vec(port_node(), 1..32),
            eol in any::<bool>(),
        ) {
            let termination = if eol { Termination::EndOfList } else { Termination::ZeroOffset };
            let result = walk(&chain_of(&nodes, termination), FeatureScope::Port).unwrap();
            prop_assert_eq!(result.node_count(), nodes.len());

            let skipped = result
                .visited
                .iter()
                .filter(|v| matches!(v.outcome, NodeOutcome::SkippedRevision(_)))
                .count();
            prop_assert_eq!(skipped, nodes.iter().filter(|(_, rev)| *rev != 0).count());
        }

        #[test]
        fn prop_last_duplicate_wins(nodes in prop::collection::vec(port_node(), 1..32)) {
            let result = walk(&chain_of(&nodes, Termination::ZeroOffset), FeatureScope::Port).unwrap();
            for id in [FeatureId::PortError, FeatureId::PortUmsg, FeatureId::PortPr, FeatureId::PortSignalTap] {
                let last = nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, (nid, rev))| *nid == id && *rev == 0)
                    .map(|(i, _)| (i + 1) * FEATURE_STRIDE)
                    .last();
                prop_assert_eq!(result.features.discovered(id).map(|f| f.offset), last);
            }
        }

        #[test]
        fn prop_bad_type_aborts(
            nodes in prop::collection::vec(port_node(), 2..16),
            bad_at in any::<prop::sample::Index>(),
            bad_type in prop_oneof![Just(0u8), Just(1u8), Just(2u8), 4u8..16],
        ) {
            let bad = bad_at.index(nodes.len());
            let chain = nodes.iter().enumerate().fold(FeatureChain::new(), |chain, (i, (id, rev))| {
                let offset = (i + 1) * FEATURE_STRIDE;
                if i == bad {
                    chain.node(offset, Dfh::new(DfhType::Private, *id as u16, *rev, 0).with_type_field(bad_type as u64))
                } else {
                    chain.revised(offset, *id, *rev)
                }
            });
            let (base, header) = header_base(&chain).unwrap();
            let (partial, fault) = walk_partial(&base, header, FeatureScope::Port, DEFAULT_MAX_NODES);

            let aborted = matches!(fault, Some(CcipError::InvalidFeatureType { .. }));
            prop_assert!(aborted, "walk did not stop at the bad type: {:?}", fault);
            prop_assert_eq!(partial.node_count(), bad);

            let bad_offset = (bad + 1) * FEATURE_STRIDE;
            let before_bad = |id: FeatureId| {
                partial.features.discovered(id).map_or(false, |f| f.offset < bad_offset)
            };
            let kept_before = partial.features.ids().all(before_bad);
            prop_assert!(kept_before, "feature kept from at or past offset {:#x}", bad_offset);
        }
    }
}
