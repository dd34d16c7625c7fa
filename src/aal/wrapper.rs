//! AAL-facing device wrapper

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use super::{AalAddress, AalDeviceKind, AalFramework, AalHandle, Pip};
use crate::device::DeviceState;
use crate::error::CcipResult;

/// One exposable resource registered with the AAL framework
pub struct CciAalDevice {
    name: String,
    kind: AalDeviceKind,
    address: AalAddress,
    pip: Arc<dyn Pip>,
    handle: AalHandle,
    state: Mutex<DeviceState>,
    released: Arc<AtomicBool>,
}

impl std::fmt::Debug for CciAalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CciAalDevice")
            .field("name", &self.name)
            .field("address", &format_args!("{}", self.address))
            .field("handle", &self.handle)
            .field("state", &self.state())
            .finish()
    }
}

impl CciAalDevice {
    /// Create the framework device and install its release callback
    ///
    /// The wrapper comes back populated but not yet published.
    pub fn create(
        framework: &dyn AalFramework,
        kind: AalDeviceKind,
        address: AalAddress,
        pip: Arc<dyn Pip>,
    ) -> CcipResult<Self> {
        let name = format!("ccip-{}-{}", kind, address);
        let handle = framework.create_device(&name, address, pip.clone())?;

        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let callback = Box::new(move |h: AalHandle| {
            debug!("AAL released device {:?}", h);
            flag.store(true, Ordering::SeqCst);
        });
        if let Err(e) = framework.set_release_callback(handle, callback) {
            framework.destroy(handle);
            return Err(e);
        }

        let mut state = DeviceState::Created;
        state.advance(DeviceState::Populated)?;
        debug!("Created {} at {}", kind, address);
        Ok(Self {
            name,
            kind,
            address,
            pip,
            handle,
            state: Mutex::new(state),
            released,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AalDeviceKind {
        self.kind
    }

    pub fn address(&self) -> AalAddress {
        self.address
    }

    pub fn pip(&self) -> &Arc<dyn Pip> {
        &self.pip
    }

    pub fn handle(&self) -> AalHandle {
        self.handle
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the framework has invoked the release callback
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn publish(&self, framework: &dyn AalFramework) -> CcipResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(DeviceState::Published) {
            return state.advance(DeviceState::Published);
        }
        framework.publish(self.handle)?;
        state.advance(DeviceState::Published)?;
        info!("Published {} at {}", self.kind, self.address);
        Ok(())
    }

    /// Unpublish if published, then destroy
    pub fn destroy(&self, framework: &dyn AalFramework) -> CcipResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == DeviceState::Published {
            framework.unpublish(self.handle);
            state.advance(DeviceState::Unpublished)?;
        }
        state.advance(DeviceState::Destroyed)?;
        framework.destroy(self.handle);
        debug!("Destroyed {} at {}", self.kind, self.address);
        Ok(())
    }
}
