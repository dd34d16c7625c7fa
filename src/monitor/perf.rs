//! Global performance counter snapshot

use std::fmt;

use tracing::{debug, warn};

use crate::csr::{read_csr64, write_csr64, CsrBase};
use crate::device::FmeDevice;
use crate::error::{CcipError, CcipResult};
use crate::regs::fme::{
    CacheEvent, FabricEvent, FpmonCacheCtl, FpmonCounter, FpmonFabricCtl, PerfFeature,
};
use crate::regs::FeatureId;

/// Snapshot layout version
pub const PERF_MONITOR_VERSION: u32 = 1;

/// Number of named counters in a snapshot
pub const PERF_MONITOR_COUNT: u32 = 11;

/// Default number of reads spent waiting for a counter to switch events
pub const CACHE_EVENT_COUNTER_MAX_TRY: usize = 30;

/// Counter values captured while the monitor was frozen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerfCounters {
    pub version: u32,
    pub num_counters: u32,

    pub read_hit: u64,
    pub write_hit: u64,
    pub read_miss: u64,
    pub write_miss: u64,
    pub evictions: u64,

    pub pcie0_read: u64,
    pub pcie0_write: u64,
    pub pcie1_read: u64,
    pub pcie1_write: u64,
    pub upi_read: u64,
    pub upi_write: u64,

    /// Interface clock counter at snapshot time
    pub clock: u64,
}

impl PerfCounters {
    /// Cache read hit ratio in `0.0..=1.0`
    pub fn hit_ratio(&self) -> f32 {
        let total = self.read_hit + self.read_miss;
        if total > 0 {
            self.read_hit as f32 / total as f32
        } else {
            0.0
        }
    }

    /// Counters with their user-visible names, in reporting order
    pub fn named(&self) -> [(&'static str, u64); PERF_MONITOR_COUNT as usize] {
        [
            ("Read_Hit", self.read_hit),
            ("Write_Hit", self.write_hit),
            ("Read_Miss", self.read_miss),
            ("Write_Miss", self.write_miss),
            ("Evictions", self.evictions),
            ("PCIe 0 Read", self.pcie0_read),
            ("PCIe 0 Write", self.pcie0_write),
            ("PCIe 1 Read", self.pcie1_read),
            ("PCIe 1 Write", self.pcie1_write),
            ("UPI Read", self.upi_read),
            ("UPI Write", self.upi_write),
        ]
    }

    fn store_cache(&mut self, event: CacheEvent, total: u64) {
        match event {
            CacheEvent::ReadHit => self.read_hit = total,
            CacheEvent::WriteHit => self.write_hit = total,
            CacheEvent::ReadMiss => self.read_miss = total,
            CacheEvent::WriteMiss => self.write_miss = total,
            CacheEvent::Evictions => self.evictions = total,
            _ => {}
        }
    }

    fn store_fabric(&mut self, event: FabricEvent, total: u64) {
        match event {
            FabricEvent::Pcie0Read => self.pcie0_read = total,
            FabricEvent::Pcie0Write => self.pcie0_write = total,
            FabricEvent::Pcie1Read => self.pcie1_read = total,
            FabricEvent::Pcie1Write => self.pcie1_write = total,
            FabricEvent::UpiRead => self.upi_read = total,
            FabricEvent::UpiWrite => self.upi_write = total,
        }
    }
}

impl fmt::Display for PerfCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performance Counters (version {}):", self.version)?;
        for (name, value) in self.named() {
            writeln!(f, "  {}: {}", name, value)?;
        }
        write!(
            f,
            "  Clock: {}\n  Read Hit Ratio: {:.2}%",
            self.clock,
            self.hit_ratio() * 100.0
        )
    }
}

const CACHE_EVENTS: [CacheEvent; 5] = [
    CacheEvent::ReadHit,
    CacheEvent::WriteHit,
    CacheEvent::ReadMiss,
    CacheEvent::WriteMiss,
    CacheEvent::Evictions,
];

const FABRIC_EVENTS: [FabricEvent; 6] = [
    FabricEvent::Pcie0Read,
    FabricEvent::Pcie0Write,
    FabricEvent::Pcie1Read,
    FabricEvent::Pcie1Write,
    FabricEvent::UpiRead,
    FabricEvent::UpiWrite,
];

/// Re-read `offset` until its event code equals `code`, at most `max_tries` times
///
/// Returns the last counter read whether or not it settled.
fn settle(base: &CsrBase, offset: usize, code: u64, max_tries: usize) -> FpmonCounter {
    let mut ctr = FpmonCounter(read_csr64(base, offset));
    for _ in 1..max_tries.max(1) {
        if ctr.event_code() == code {
            return ctr;
        }
        ctr = FpmonCounter(read_csr64(base, offset));
    }
    if ctr.event_code() != code {
        warn!("Perf counter did not switch to event {:#x} after {} reads", code, max_tries);
    }
    ctr
}

fn set_freeze(base: &CsrBase, freeze: bool) -> CcipResult<()> {
    let value = u64::from(freeze);
    let cache = FpmonCacheCtl(read_csr64(base, PerfFeature::CACHE_CTL)).with_freeze(value);
    write_csr64(base, PerfFeature::CACHE_CTL, cache.csr())?;
    let fabric = FpmonFabricCtl(read_csr64(base, PerfFeature::FABRIC_CTL)).with_freeze(value);
    write_csr64(base, PerfFeature::FABRIC_CTL, fabric.csr())
}

fn sample(base: &CsrBase, max_tries: usize) -> CcipResult<PerfCounters> {
    let mut counters = PerfCounters {
        version: PERF_MONITOR_VERSION,
        num_counters: PERF_MONITOR_COUNT,
        ..Default::default()
    };

    for event in CACHE_EVENTS {
        let code = event as u64;
        let ctl = FpmonCacheCtl(read_csr64(base, PerfFeature::CACHE_CTL)).with_cache_event(code);
        write_csr64(base, PerfFeature::CACHE_CTL, ctl.csr())?;
        let ctr0 = settle(base, PerfFeature::CACHE_CTR0, code, max_tries);
        let ctr1 = FpmonCounter(read_csr64(base, PerfFeature::CACHE_CTR1));
        counters.store_cache(event, ctr0.counter() + ctr1.counter());
    }

    for event in FABRIC_EVENTS {
        let code = event as u64;
        let ctl =
            FpmonFabricCtl(read_csr64(base, PerfFeature::FABRIC_CTL)).with_fabric_evt_code(code);
        write_csr64(base, PerfFeature::FABRIC_CTL, ctl.csr())?;
        let ctr = settle(base, PerfFeature::FABRIC_CTR, code, max_tries);
        counters.store_fabric(event, ctr.counter());
    }

    counters.clock = read_csr64(base, PerfFeature::CLOCK);
    Ok(counters)
}

/// Freeze the global performance monitor, read every counter, unfreeze
pub fn get_perfmon_counters(fme: &FmeDevice, max_tries: usize) -> CcipResult<PerfCounters> {
    let base = fme
        .feature_base(FeatureId::FmeGlobalPerf)
        .ok_or(CcipError::FeatureAbsent(FeatureId::FmeGlobalPerf.name()))?;

    set_freeze(&base, true)?;
    let result = sample(&base, max_tries);
    // Unfreeze even if sampling failed part way
    let unfrozen = set_freeze(&base, false);
    let counters = result?;
    unfrozen?;

    debug!("Perf snapshot: clock {} hits {}", counters.clock, counters.read_hit);
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::csr::{BarSet, MmioRegion};
    use crate::sim::{BoardImage, FeatureChain, SimulatedMmio, FME_BAR, FME_WINDOW};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PERF: usize = 0x3000;

    /// Performance monitor whose counters follow the selected event
    #[derive(Debug)]
    struct PerfModel {
        regs: SimulatedMmio,
        /// Reads of a counter that still report the previous event code
        lag: usize,
        pending: AtomicUsize,
    }

    impl PerfModel {
        fn counter_value(code: u64, which: u64) -> u64 {
            100 * (code + 1) + which
        }
    }

    impl MmioRegion for PerfModel {
        fn len(&self) -> usize {
            self.regs.len()
        }

        fn read64(&self, offset: usize) -> u64 {
            let is_counter = offset == PERF + PerfFeature::CACHE_CTR0
                || offset == PERF + PerfFeature::FABRIC_CTR;
            if is_counter && self.pending.load(Ordering::SeqCst) > 0 {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                return FpmonCounter(0).with_event_code(0xF).csr();
            }
            self.regs.read64(offset)
        }

        fn write64(&self, offset: usize, value: u64) {
            self.regs.write64(offset, value);
            if offset == PERF + PerfFeature::CACHE_CTL {
                let code = FpmonCacheCtl(value).cache_event();
                let ctr = |which| {
                    FpmonCounter(0)
                        .with_event_code(code)
                        .with_counter(Self::counter_value(code, which))
                };
                self.regs.poke(PERF + PerfFeature::CACHE_CTR0, ctr(0).csr());
                self.regs.poke(PERF + PerfFeature::CACHE_CTR1, ctr(1).csr());
                self.pending.store(self.lag, Ordering::SeqCst);
            } else if offset == PERF + PerfFeature::FABRIC_CTL {
                let code = FpmonFabricCtl(value).fabric_evt_code();
                let ctr = FpmonCounter(0).with_event_code(code).with_counter(1000 + code);
                self.regs.poke(PERF + PerfFeature::FABRIC_CTR, ctr.csr());
                self.pending.store(self.lag, Ordering::SeqCst);
            }
        }
    }

    fn fme_with_model(lag: usize) -> CcipResult<(Arc<PerfModel>, FmeDevice)> {
        let image = BoardImage::new()
            .with_fme_features(FeatureChain::new().feature(PERF, FeatureId::FmeGlobalPerf))
            .build()?;
        let regs = SimulatedMmio::new(FME_WINDOW);
        for offset in (0..FME_WINDOW).step_by(8) {
            regs.poke(offset, image.fme.peek(offset));
        }
        regs.poke(PERF + PerfFeature::CLOCK, 0xC10C);
        let model = Arc::new(PerfModel {
            regs,
            lag,
            pending: AtomicUsize::new(0),
        });
        let bars = BarSet::new().with_bar(FME_BAR, model.clone())?;
        let fme = FmeDevice::discover(bars.bar(FME_BAR)?, &DriverConfig::default())?;
        Ok((model, fme))
    }

    #[test]
    fn test_snapshot_reads_every_counter() -> CcipResult<()> {
        let (model, fme) = fme_with_model(3)?;
        let snap = get_perfmon_counters(&fme, CACHE_EVENT_COUNTER_MAX_TRY)?;

        assert_eq!(snap.version, PERF_MONITOR_VERSION);
        assert_eq!(snap.num_counters, 11);
        // ctr0 + ctr1 for each cache event
        assert_eq!(snap.read_hit, 100 + 101);
        assert_eq!(snap.write_hit, 200 + 201);
        assert_eq!(snap.evictions, 1100 + 1101);
        assert_eq!(snap.pcie0_read, 1000);
        assert_eq!(snap.pcie0_write, 1001);
        assert_eq!(snap.upi_write, 1005);
        assert_eq!(snap.clock, 0xC10C);

        let ctl = FpmonCacheCtl(model.regs.peek(PERF + PerfFeature::CACHE_CTL));
        assert_eq!(ctl.freeze(), 0);
        Ok(())
    }

    #[test]
    fn test_unsettled_counter_read_after_max_tries() -> CcipResult<()> {
        let (_, fme) = fme_with_model(usize::MAX / 2)?;
        let snap = get_perfmon_counters(&fme, 4)?;
        assert_eq!(snap.read_hit, 101);
        assert_eq!(snap.pcie0_write, 0);
        Ok(())
    }

    #[test]
    fn test_absent_monitor() -> CcipResult<()> {
        let board = BoardImage::new().build()?;
        let fme = FmeDevice::discover(board.bars().bar(FME_BAR)?, &DriverConfig::default())?;
        assert!(matches!(
            get_perfmon_counters(&fme, 1),
            Err(CcipError::FeatureAbsent(_))
        ));
        Ok(())
    }

    #[test]
    fn test_display_lists_names() {
        let text = PerfCounters::default().to_string();
        assert!(text.contains("PCIe 0 Write"));
        assert!(text.contains("Evictions"));
    }
}
