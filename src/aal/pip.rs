//! Physical interface protocols: how an AAL device reaches its registers

use std::fmt;
use std::sync::Arc;

use crate::csr::{read_csr64, write_csr64, CsrBase};
use crate::error::{CcipError, CcipResult};
use crate::regs::{ALL_ONES, CSR_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipKind {
    Fme,
    Port,
    Afu,
}

/// Register window exposed to the AAL layer for one device
pub trait Pip: Send + Sync + fmt::Debug {
    fn kind(&self) -> PipKind;

    /// Start of the device's MMIO window
    fn mmio(&self) -> &CsrBase;

    /// Length of the window in bytes
    fn mmio_len(&self) -> usize;

    /// Read a CSR inside the window; all-ones outside it
    fn read_csr(&self, offset: usize) -> u64 {
        if offset.saturating_add(CSR_SIZE) > self.mmio_len() {
            return ALL_ONES;
        }
        read_csr64(self.mmio(), offset)
    }

    fn write_csr(&self, offset: usize, value: u64) -> CcipResult<()> {
        if offset.saturating_add(CSR_SIZE) > self.mmio_len() {
            return Err(CcipError::OutOfRange {
                offset,
                len: self.mmio_len(),
            });
        }
        write_csr64(self.mmio(), offset, value)
    }
}

macro_rules! pip {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            base: CsrBase,
            len: usize,
        }

        impl $name {
            pub fn new(base: CsrBase, len: usize) -> Self {
                Self { base, len }
            }
        }

        impl Pip for $name {
            fn kind(&self) -> PipKind {
                PipKind::$kind
            }

            fn mmio(&self) -> &CsrBase {
                &self.base
            }

            fn mmio_len(&self) -> usize {
                self.len
            }
        }
    };
}

pip! {
    /// FME register window
    FmePip => Fme
}

pip! {
    /// Port, Signal-Tap and PR register window
    PortPip => Port
}

pip! {
    /// User AFU register window
    AfuPip => Afu
}

/// PIP of `kind` over `base`, bounded by `len` bytes
pub fn select_pip(kind: PipKind, base: CsrBase, len: usize) -> Arc<dyn Pip> {
    match kind {
        PipKind::Fme => Arc::new(FmePip::new(base, len)),
        PipKind::Port => Arc::new(PortPip::new(base, len)),
        PipKind::Afu => Arc::new(AfuPip::new(base, len)),
    }
}
