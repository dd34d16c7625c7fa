//! Simulated MMIO backend
//!
//! An in-memory register file used in place of a PCI BAR when no hardware is
//! present. Registers change under concurrent readers exactly as hardware
//! registers would, so the polling paths can be exercised end to end.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::csr::MmioRegion;
use crate::regs::{ALL_ONES, CSR_SIZE};

mod image;

pub use image::{
    BoardImage, FeatureChain, PortImage, SimulatedBoard, Termination, FME_BAR, FME_WINDOW, PORT_BAR,
    PORT_WINDOW,
};

/// Interior-mutable 64-bit register file
pub struct SimulatedMmio {
    regs: Vec<AtomicU64>,
    phys_base: u64,
}

impl SimulatedMmio {
    /// Zero-filled window of `len` bytes, rounded down to whole CSRs
    pub fn new(len: usize) -> Self {
        Self::filled(len, 0)
    }

    /// Window of `len` bytes with every CSR set to `value`
    pub fn filled(len: usize, value: u64) -> Self {
        let regs = (0..len / CSR_SIZE).map(|_| AtomicU64::new(value)).collect();
        Self { regs, phys_base: 0 }
    }

    /// Window that reads back like an absent device
    pub fn absent(len: usize) -> Self {
        Self::filled(len, ALL_ONES)
    }

    pub fn with_phys_base(mut self, phys_base: u64) -> Self {
        self.phys_base = phys_base;
        self
    }

    /// Set a register without going through a `CsrBase`
    pub fn poke(&self, offset: usize, value: u64) {
        if let Some(reg) = self.slot(offset) {
            reg.store(value, Ordering::SeqCst);
        }
    }

    /// Read a register without going through a `CsrBase`
    pub fn peek(&self, offset: usize) -> u64 {
        self.slot(offset)
            .map_or(ALL_ONES, |reg| reg.load(Ordering::SeqCst))
    }

    /// Write consecutive CSRs starting at `offset`
    pub fn poke_block(&self, offset: usize, csrs: &[u64]) {
        for (i, csr) in csrs.iter().enumerate() {
            self.poke(offset + i * CSR_SIZE, *csr);
        }
    }

    fn slot(&self, offset: usize) -> Option<&AtomicU64> {
        if offset % CSR_SIZE != 0 {
            return None;
        }
        self.regs.get(offset / CSR_SIZE)
    }
}

impl std::fmt::Debug for SimulatedMmio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedMmio")
            .field("len", &format_args!("{:#x}", self.len()))
            .field("phys_base", &format_args!("{:#x}", self.phys_base))
            .finish()
    }
}

impl MmioRegion for SimulatedMmio {
    fn len(&self) -> usize {
        self.regs.len() * CSR_SIZE
    }

    fn read64(&self, offset: usize) -> u64 {
        self.peek(offset)
    }

    fn write64(&self, offset: usize, value: u64) {
        self.poke(offset, value)
    }

    fn phys_base(&self) -> u64 {
        self.phys_base
    }
}
