//! CCI-P FPGA Driver Core
//!
//! Discovers the FME and ports of CCI-P accelerator boards by walking their
//! device feature lists, exposes each resource to an AAL device framework and
//! polls error, thermal and power-state registers.

// Register macros must be defined before the modules that use them
#[macro_use]
pub mod regs;

pub mod aal;
pub mod config;
pub mod csr;
pub mod device;
pub mod dfl;
pub mod driver;
pub mod error;
pub mod monitor;
pub mod sim;
pub mod utils;

// Prelude for convenient imports
pub mod prelude {
    pub use crate::aal::{AalAddress, AalDeviceKind, AalFramework, InMemoryAalBus};
    pub use crate::config::DriverConfig;
    pub use crate::csr::{BarSet, CsrBase, MmioRegion};
    pub use crate::device::{CcipDevice, FmeDevice, PciLocation, PortDevice};
    pub use crate::driver::CcipDriver;
    pub use crate::error::{CcipError, CcipResult, ErrorExt};
    pub use crate::monitor::{ErrorEvent, PerfCounters};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
