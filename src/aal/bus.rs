//! In-process AAL framework
//!
//! Records every device the driver creates and publishes. Used where no
//! external resource manager is attached, and to observe the driver in tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{AalAddress, AalFramework, AalHandle, Pip, ReleaseCallback};
use crate::error::{CcipError, CcipResult};

/// One device known to the bus
pub struct BusEntry {
    pub name: String,
    pub address: AalAddress,
    pub pip: Arc<dyn Pip>,
    pub published: bool,
    release: Option<ReleaseCallback>,
}

#[derive(Default)]
struct BusState {
    next_handle: u64,
    devices: BTreeMap<AalHandle, BusEntry>,
    publish_calls: usize,
    unpublish_calls: usize,
    fail_publish_at: Option<usize>,
    fail_create_at: Option<usize>,
    create_calls: usize,
}

#[derive(Default)]
pub struct InMemoryAalBus {
    state: Mutex<BusState>,
}

impl InMemoryAalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th publish call (0-based) fail
    pub fn fail_publish_at(self, n: usize) -> Self {
        self.lock().fail_publish_at = Some(n);
        self
    }

    /// Make the `n`th create call (0-based) fail
    pub fn fail_create_at(self, n: usize) -> Self {
        self.lock().fail_create_at = Some(n);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Devices created and not yet destroyed
    pub fn device_count(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn published_count(&self) -> usize {
        self.lock().devices.values().filter(|d| d.published).count()
    }

    /// Addresses of every published device, in creation order
    pub fn published_addresses(&self) -> Vec<AalAddress> {
        self.lock()
            .devices
            .values()
            .filter(|d| d.published)
            .map(|d| d.address)
            .collect()
    }

    /// Names of every live device, in creation order
    pub fn device_names(&self) -> Vec<String> {
        self.lock().devices.values().map(|d| d.name.clone()).collect()
    }

    pub fn unpublish_calls(&self) -> usize {
        self.lock().unpublish_calls
    }

    /// Run `f` against the device with `handle`, if it exists
    pub fn with_device<R>(&self, handle: AalHandle, f: impl FnOnce(&BusEntry) -> R) -> Option<R> {
        self.lock().devices.get(&handle).map(f)
    }
}

impl AalFramework for InMemoryAalBus {
    fn create_device(
        &self,
        name: &str,
        address: AalAddress,
        pip: Arc<dyn Pip>,
    ) -> CcipResult<AalHandle> {
        let mut state = self.lock();
        let call = state.create_calls;
        state.create_calls += 1;
        if state.fail_create_at == Some(call) {
            return Err(CcipError::framework("create_device", format!("{name} rejected")));
        }
        if state.devices.values().any(|d| d.address == address) {
            return Err(CcipError::framework(
                "create_device",
                format!("address {address} already in use"),
            ));
        }
        let handle = AalHandle(state.next_handle);
        state.next_handle += 1;
        state.devices.insert(
            handle,
            BusEntry {
                name: name.to_string(),
                address,
                pip,
                published: false,
                release: None,
            },
        );
        debug!("Bus created {} as {:?}", name, handle);
        Ok(handle)
    }

    fn publish(&self, handle: AalHandle) -> CcipResult<()> {
        let mut state = self.lock();
        let call = state.publish_calls;
        state.publish_calls += 1;
        if state.fail_publish_at == Some(call) {
            return Err(CcipError::framework("publish", format!("{handle:?} rejected")));
        }
        let entry = state
            .devices
            .get_mut(&handle)
            .ok_or_else(|| CcipError::framework("publish", format!("unknown {handle:?}")))?;
        entry.published = true;
        Ok(())
    }

    fn unpublish(&self, handle: AalHandle) {
        let mut state = self.lock();
        state.unpublish_calls += 1;
        if let Some(entry) = state.devices.get_mut(&handle) {
            entry.published = false;
        }
    }

    fn set_release_callback(&self, handle: AalHandle, callback: ReleaseCallback) -> CcipResult<()> {
        let mut state = self.lock();
        let entry = state.devices.get_mut(&handle).ok_or_else(|| {
            CcipError::framework("set_release_callback", format!("unknown {handle:?}"))
        })?;
        entry.release = Some(callback);
        Ok(())
    }

    fn destroy(&self, handle: AalHandle) {
        let entry = self.lock().devices.remove(&handle);
        // Release outside the lock; callbacks may call back into the bus
        if let Some(release) = entry.and_then(|e| e.release) {
            release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aal::{select_pip, PipKind, FME_SUBDEVICE};
    use crate::csr::CsrBase;

    fn address(instance: u16) -> AalAddress {
        AalAddress {
            bus: 1,
            device: 0,
            function: 0,
            subdevice: FME_SUBDEVICE,
            instance,
        }
    }

    fn pip() -> Arc<dyn Pip> {
        select_pip(PipKind::Fme, CsrBase::null(), 0)
    }

    #[test]
    fn test_duplicate_address_rejected() -> CcipResult<()> {
        let bus = InMemoryAalBus::new();
        bus.create_device("a", address(0), pip())?;
        assert!(bus.create_device("b", address(0), pip()).is_err());
        assert!(bus.create_device("c", address(1), pip()).is_ok());
        assert_eq!(bus.device_names(), vec!["a".to_string(), "c".to_string()]);
        Ok(())
    }

    #[test]
    fn test_injected_publish_failure() -> CcipResult<()> {
        let bus = InMemoryAalBus::new().fail_publish_at(1);
        let a = bus.create_device("a", address(0), pip())?;
        let b = bus.create_device("b", address(1), pip())?;
        bus.publish(a)?;
        assert!(bus.publish(b).is_err());
        assert_eq!(bus.published_addresses(), vec![address(0)]);
        assert_eq!(bus.with_device(b, |d| d.published), Some(false));
        Ok(())
    }
}
