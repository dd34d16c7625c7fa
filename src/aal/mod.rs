//! AAL-facing device wrappers and the framework they are published to
//!
//! Every exposable resource of a board (the FME, and each port's Port,
//! Signal-Tap, PR and User-AFU) becomes one [`CciAalDevice`] with a unique
//! hierarchical [`AalAddress`]. The device framework itself is a collaborator
//! behind the [`AalFramework`] trait.

use std::fmt;
use std::sync::Arc;

use crate::device::PciLocation;
use crate::error::CcipResult;

mod bus;
mod pip;
mod wrapper;

pub use bus::{BusEntry, InMemoryAalBus};
pub use pip::{select_pip, AfuPip, FmePip, Pip, PipKind, PortPip};
pub use wrapper::CciAalDevice;

/// Subdevice number reserved for the FME
pub const FME_SUBDEVICE: u16 = 0xFFFF;

/// `bus:device:function:subdevice:instance`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AalAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    /// `0xFFFF` for the FME, the port index for anything under a port
    pub subdevice: u16,
    /// Distinguishes objects created under the same subdevice
    pub instance: u16,
}

impl AalAddress {
    pub const fn new(location: &PciLocation, subdevice: u16, instance: u16) -> Self {
        Self {
            bus: location.bus,
            device: location.device,
            function: location.function,
            subdevice,
            instance,
        }
    }

    pub const fn fme(location: &PciLocation) -> Self {
        Self::new(location, FME_SUBDEVICE, 0)
    }

    /// Address of the `kind` object under port `port`
    pub const fn port(location: &PciLocation, port: u16, kind: AalDeviceKind) -> Self {
        Self::new(location, port, kind.port_instance())
    }
}

impl fmt::Display for AalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{:x}:{:04x}:{}",
            self.bus, self.device, self.function, self.subdevice, self.instance
        )
    }
}

/// Kinds of AAL-facing devices, in per-port creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AalDeviceKind {
    Fme,
    Port,
    SignalTap,
    Pr,
    UserAfu,
}

impl AalDeviceKind {
    pub const fn name(&self) -> &'static str {
        match self {
            AalDeviceKind::Fme => "fme",
            AalDeviceKind::Port => "port",
            AalDeviceKind::SignalTap => "stap",
            AalDeviceKind::Pr => "pr",
            AalDeviceKind::UserAfu => "afu",
        }
    }

    /// Instance number under a port subdevice
    pub const fn port_instance(&self) -> u16 {
        match self {
            AalDeviceKind::Fme | AalDeviceKind::Port => 0,
            AalDeviceKind::SignalTap => 1,
            AalDeviceKind::Pr => 2,
            AalDeviceKind::UserAfu => 3,
        }
    }

    pub const fn pip_kind(&self) -> PipKind {
        match self {
            AalDeviceKind::Fme => PipKind::Fme,
            AalDeviceKind::Port | AalDeviceKind::SignalTap | AalDeviceKind::Pr => PipKind::Port,
            AalDeviceKind::UserAfu => PipKind::Afu,
        }
    }
}

impl fmt::Display for AalDeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle the framework returns for a created device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AalHandle(pub u64);

/// Invoked by the framework when it releases a device
pub type ReleaseCallback = Box<dyn FnOnce(AalHandle) + Send>;

/// The AAL device framework, consumed by the driver
///
/// Each wrapper calls `create_device`, `set_release_callback` and `publish`
/// exactly once, and `unpublish`/`destroy` once at teardown.
pub trait AalFramework: Send + Sync {
    fn create_device(
        &self,
        name: &str,
        address: AalAddress,
        pip: Arc<dyn Pip>,
    ) -> CcipResult<AalHandle>;

    fn publish(&self, handle: AalHandle) -> CcipResult<()>;

    fn unpublish(&self, handle: AalHandle);

    fn set_release_callback(&self, handle: AalHandle, callback: ReleaseCallback) -> CcipResult<()>;

    fn destroy(&self, handle: AalHandle);
}
