//! Device object model: boards, FMEs, ports and AFUs

mod afu;
mod board;
mod fme;
mod lifecycle;
mod port;
mod registry;

pub use afu::{discover_afu, AfuDevice};
pub use board::CcipDevice;
pub use fme::FmeDevice;
pub use lifecycle::DeviceState;
pub use port::PortDevice;
pub use registry::BoardRegistry;

use std::fmt;
use std::str::FromStr;

use crate::error::CcipError;

/// PCIe identity of a board: `DDDD:BB:DD.F`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciLocation {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciLocation {
    pub const fn new(domain: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }
}

impl fmt::Display for PciLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl FromStr for PciLocation {
    type Err = CcipError;

    /// Parse `DDDD:BB:DD.F`, or `BB:DD.F` with domain 0
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CcipError::invalid_state(format!("malformed PCI location '{s}'"));
        let (head, function) = s.rsplit_once('.').ok_or_else(bad)?;
        let parts: Vec<&str> = head.split(':').collect();
        let (domain, bus, device) = match parts.as_slice() {
            [d, b, dev] => (*d, *b, *dev),
            [b, dev] => ("0", *b, *dev),
            _ => return Err(bad()),
        };
        let location = Self {
            domain: u16::from_str_radix(domain, 16).map_err(|_| bad())?,
            bus: u8::from_str_radix(bus, 16).map_err(|_| bad())?,
            device: u8::from_str_radix(device, 16).map_err(|_| bad())?,
            function: u8::from_str_radix(function, 16).map_err(|_| bad())?,
        };
        if location.device > 0x1F || location.function > 0x7 {
            return Err(bad());
        }
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_roundtrip() -> Result<(), CcipError> {
        let loc: PciLocation = "0000:5e:00.1".parse()?;
        assert_eq!(loc, PciLocation::new(0, 0x5e, 0, 1));
        assert_eq!(loc.to_string(), "0000:5e:00.1");

        let short: PciLocation = "be:1f.7".parse()?;
        assert_eq!(short, PciLocation::new(0, 0xbe, 0x1f, 7));
        Ok(())
    }

    #[test]
    fn test_location_rejects_garbage() {
        for s in ["", "5e", "0000:5e:00", "0000:5e:20.0", "0000:5e:00.8", "zz:00.0"] {
            assert!(s.parse::<PciLocation>().is_err(), "{s}");
        }
    }
}
