//! Process-wide list of probed boards

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::board::CcipDevice;
use super::PciLocation;
use crate::error::{CcipError, CcipResult};

/// Boards known to one driver instance
///
/// Lookups and polling traversals take the read lock; only `add`, `remove`
/// and `drain` take the write lock, and only for the list update itself.
#[derive(Debug, Default)]
pub struct BoardRegistry {
    boards: RwLock<Vec<Arc<CcipDevice>>>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<CcipDevice>>> {
        self.boards.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<CcipDevice>>> {
        self.boards.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a board; a second board at the same location is rejected
    pub fn add(&self, board: Arc<CcipDevice>) -> CcipResult<()> {
        let mut boards = self.write();
        let location = board.location();
        if boards.iter().any(|b| b.location() == location) {
            return Err(CcipError::invalid_state(format!(
                "board {location} already registered"
            )));
        }
        boards
            .try_reserve(1)
            .map_err(|_| CcipError::out_of_memory("board list"))?;
        boards.push(board);
        debug!(%location, "Registered board ({} total)", boards.len());
        Ok(())
    }

    /// Unregister the board at `location` without tearing it down
    pub fn remove(&self, location: PciLocation) -> Option<Arc<CcipDevice>> {
        let mut boards = self.write();
        let index = boards.iter().position(|b| b.location() == location)?;
        Some(boards.remove(index))
    }

    pub fn find(&self, location: PciLocation) -> Option<Arc<CcipDevice>> {
        self.read()
            .iter()
            .find(|b| b.location() == location)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Run `f` on every board with the list read-locked
    pub fn for_each(&self, mut f: impl FnMut(&CcipDevice)) {
        for board in self.read().iter() {
            f(board);
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<CcipDevice>> {
        self.read().clone()
    }

    /// Unregister every board, most recently added first
    pub fn drain(&self) -> Vec<Arc<CcipDevice>> {
        let mut boards = std::mem::take(&mut *self.write());
        boards.reverse();
        boards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aal::InMemoryAalBus;
    use crate::config::DriverConfig;
    use crate::sim::BoardImage;

    fn board(bus: u8) -> CcipResult<Arc<CcipDevice>> {
        let sim = BoardImage::new().build()?;
        CcipDevice::probe(
            PciLocation::new(0, bus, 0, 0),
            sim.bars(),
            Arc::new(InMemoryAalBus::new()),
            &DriverConfig::default(),
        )
    }

    #[test]
    fn test_add_find_remove() -> CcipResult<()> {
        let registry = BoardRegistry::new();
        registry.add(board(1)?)?;
        registry.add(board(2)?)?;
        assert_eq!(registry.len(), 2);
        assert!(registry.add(board(1)?).is_err());

        let loc = PciLocation::new(0, 2, 0, 0);
        assert!(registry.find(loc).is_some());
        assert!(registry.remove(loc).is_some());
        assert!(registry.find(loc).is_none());
        assert!(registry.remove(loc).is_none());
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[test]
    fn test_drain_is_lifo() -> CcipResult<()> {
        let registry = BoardRegistry::new();
        for bus in 1..=3 {
            registry.add(board(bus)?)?;
        }
        let order: Vec<u8> = registry.drain().iter().map(|b| b.location().bus).collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert!(registry.is_empty());
        Ok(())
    }
}
