//! User AFU discovery behind a port

use tracing::{debug, info};

use crate::csr::{read_csr64, CsrBase};
use crate::error::CcipResult;
use crate::regs::{AfuHeader, Guid, NextAfu, ALL_ONES};

/// A user AFU found behind a port
#[derive(Debug, Clone)]
pub struct AfuDevice {
    base: CsrBase,
    header: AfuHeader,
}

impl AfuDevice {
    pub fn base(&self) -> &CsrBase {
        &self.base
    }

    pub fn header(&self) -> &AfuHeader {
        &self.header
    }

    pub fn guid(&self) -> Guid {
        self.header.guid()
    }
}

/// Look for an AFU at `port_base + next_afu.afu_id_offset`
///
/// An all-ones DFH at that location means no AFU is loaded.
pub fn discover_afu(port_base: &CsrBase, next_afu: NextAfu) -> CcipResult<Option<AfuDevice>> {
    let base = port_base.at(next_afu.afu_id_offset() as usize);
    if read_csr64(&base, AfuHeader::DFH) == ALL_ONES {
        debug!("No AFU at port offset {:#x}", next_afu.afu_id_offset());
        return Ok(None);
    }
    let header = base.read_block::<AfuHeader>()?;
    info!("AFU {} at {:#x}", header.guid(), base.phys_addr());
    Ok(Some(AfuDevice { base, header }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedMmio;
    use std::sync::Arc;

    #[test]
    fn test_afu_presence() -> CcipResult<()> {
        let mmio = Arc::new(SimulatedMmio::new(0x2000));
        let port = CsrBase::new(mmio.clone());
        let next = NextAfu(0).with_afu_id_offset(0x1000);

        mmio.poke(0x1000, ALL_ONES);
        assert!(discover_afu(&port, next)?.is_none());

        mmio.poke(0x1000, 0x1000_0000_0000_0000);
        mmio.poke(0x1008, 0x9AB3_0C76_6F3B_19E0);
        mmio.poke(0x1010, 0xC000_C966_0D82_4272);
        let afu = discover_afu(&port, next)?;
        assert_eq!(
            afu.map(|a| a.guid().to_string()),
            Some("c000c966-0d82-4272-9ab3-0c766f3b19e0".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_afu_outside_window_is_absent() -> CcipResult<()> {
        let port = CsrBase::new(Arc::new(SimulatedMmio::new(0x100)));
        assert!(discover_afu(&port, NextAfu(0x4000))?.is_none());
        assert!(discover_afu(&CsrBase::null(), NextAfu(0))?.is_none());
        Ok(())
    }
}
