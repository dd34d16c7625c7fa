//! Error, thermal and power-state polling for FMEs and ports

use tracing::{error, info};

use super::edge::{EdgeDetector, Transition};
use crate::csr::read_csr64;
use crate::device::{CcipDevice, FmeDevice, PciLocation, PortDevice};
use crate::regs::fme::{FmePrError, FmePrFeature, GlobalErrorFeature, TempThreshold, ThermalFeature};
use crate::regs::port::{AfuPowerState, PortErrorBits, PortErrorFeature};
use crate::regs::FeatureId;

/// Registers whose value changes are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorRegister {
    FmeError0,
    FmeError1,
    FmeError2,
    FmeFirstError,
    FmeNextError,
    FmePrError,
    PortError,
    PortFirstError,
}

impl ErrorRegister {
    pub const fn name(&self) -> &'static str {
        match self {
            ErrorRegister::FmeError0 => "FME Error0",
            ErrorRegister::FmeError1 => "FME Error1",
            ErrorRegister::FmeError2 => "FME Error2",
            ErrorRegister::FmeFirstError => "FME First Error",
            ErrorRegister::FmeNextError => "FME Next Error",
            ErrorRegister::FmePrError => "FME PR Error",
            ErrorRegister::PortError => "Port Error",
            ErrorRegister::PortFirstError => "Port First Error",
        }
    }

    /// Names of the error bits set in `bits`
    ///
    /// Registers without a per-bit layout decode to nothing.
    pub fn decode(&self, bits: u64) -> Vec<&'static str> {
        match self {
            ErrorRegister::PortError | ErrorRegister::PortFirstError => PortErrorBits(bits).set_fields(),
            ErrorRegister::FmePrError => FmePrError(bits).set_fields(),
            _ => Vec::new(),
        }
    }
}

/// AFU power-throttling states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApState {
    Ap1,
    Ap2,
    Ap6,
}

/// One reported change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEvent {
    Register {
        location: PciLocation,
        /// `None` for FME registers
        port: Option<usize>,
        register: ErrorRegister,
        transition: Transition,
    },
    /// A thermal threshold status bit changed
    Thermal {
        location: PciLocation,
        state: ApState,
        /// Threshold 1 or 2
        threshold: u8,
        asserted: bool,
    },
    /// The captured malformed request header changed while a port error was latched
    MalformedRequest {
        location: PciLocation,
        port: usize,
        /// Header bits [63:0]
        lsb: u64,
        /// Header bits [127:64]
        msb: u64,
    },
    /// A port's `afu_pwr_state` changed
    PowerState {
        location: PciLocation,
        port: usize,
        previous: u64,
        current: u64,
    },
}

impl ErrorEvent {
    pub fn location(&self) -> PciLocation {
        match self {
            ErrorEvent::Register { location, .. }
            | ErrorEvent::Thermal { location, .. }
            | ErrorEvent::MalformedRequest { location, .. }
            | ErrorEvent::PowerState { location, .. } => *location,
        }
    }

    pub fn power_state(&self) -> Option<AfuPowerState> {
        use num_traits::FromPrimitive;
        match self {
            ErrorEvent::PowerState { current, .. } => AfuPowerState::from_u64(*current),
            _ => None,
        }
    }

    /// Named error bits that went from clear to set in this change
    pub fn newly_set(&self) -> Vec<&'static str> {
        match self {
            ErrorEvent::Register {
                register,
                transition: Transition::Raised { previous, current },
                ..
            } => register.decode(current & !previous),
            _ => Vec::new(),
        }
    }
}

/// Last-seen FME registers
#[derive(Debug, Clone, Default)]
pub struct FmeErrorState {
    error0: EdgeDetector,
    error1: EdgeDetector,
    error2: EdgeDetector,
    first_error: EdgeDetector,
    next_error: EdgeDetector,
    pr_error: EdgeDetector,
    thshold1: EdgeDetector,
    thshold2: EdgeDetector,
}

/// Last-seen port registers
#[derive(Debug, Clone, Default)]
pub struct PortErrorState {
    error: EdgeDetector,
    first_error: EdgeDetector,
    malformed_lsb: EdgeDetector,
    malformed_msb: EdgeDetector,
    power_state: EdgeDetector,
}

fn report(
    events: &mut Vec<ErrorEvent>,
    location: PciLocation,
    port: Option<usize>,
    register: ErrorRegister,
    transition: Option<Transition>,
) {
    let Some(transition) = transition else {
        return;
    };
    match transition {
        Transition::Raised { previous, current } => {
            error!(
                bus = location.bus,
                device = location.device,
                function = location.function,
                port = port,
                register = register.name(),
                value = current,
                "FPGA error occurred"
            );
            for bit in register.decode(current & !previous) {
                error!(
                    bus = location.bus,
                    device = location.device,
                    function = location.function,
                    port = port,
                    register = register.name(),
                    bit = bit,
                    "FPGA error bit set"
                );
            }
        }
        Transition::Cleared { previous } => info!(
            bus = location.bus,
            device = location.device,
            function = location.function,
            port = port,
            register = register.name(),
            previous = previous,
            "FPGA error cleared"
        ),
    }
    events.push(ErrorEvent::Register {
        location,
        port,
        register,
        transition,
    });
}

/// Poll the FME's error, PR and thermal registers
pub fn poll_fme(location: PciLocation, fme: &FmeDevice) -> Vec<ErrorEvent> {
    let mut events = Vec::new();
    let features = fme.features();
    let mut guard = fme.error_state();
    let state = &mut *guard;

    if let Some(base) = features.base(FeatureId::FmeGlobalError) {
        let registers = [
            (ErrorRegister::FmeError0, GlobalErrorFeature::ERROR0, &mut state.error0),
            (ErrorRegister::FmeError1, GlobalErrorFeature::ERROR1, &mut state.error1),
            (ErrorRegister::FmeError2, GlobalErrorFeature::ERROR2, &mut state.error2),
            (ErrorRegister::FmeFirstError, GlobalErrorFeature::FIRST_ERROR, &mut state.first_error),
            (ErrorRegister::FmeNextError, GlobalErrorFeature::NEXT_ERROR, &mut state.next_error),
        ];
        for (register, offset, detector) in registers {
            let change = detector.update(read_csr64(base, offset));
            report(&mut events, location, None, register, change);
        }
    }

    if let Some(base) = features.base(FeatureId::FmePr) {
        let change = state.pr_error.update(read_csr64(base, FmePrFeature::ERROR));
        report(&mut events, location, None, ErrorRegister::FmePrError, change);
    }

    if let Some(base) = features.base(FeatureId::FmeThermal) {
        let threshold = TempThreshold(read_csr64(base, ThermalFeature::THRESHOLD));
        let policy_ap1 = threshold.thshold_policy() == 1;

        if state.thshold1.update(threshold.thshold1_status()).is_some() {
            let ap = if policy_ap1 { ApState::Ap1 } else { ApState::Ap2 };
            events.push(thermal_event(location, ap, 1, threshold.thshold1_status() == 1));
        }
        if state.thshold2.update(threshold.thshold2_status()).is_some() && policy_ap1 {
            events.push(thermal_event(location, ApState::Ap6, 2, threshold.thshold2_status() == 1));
        }
    }

    events
}

fn thermal_event(location: PciLocation, state: ApState, threshold: u8, asserted: bool) -> ErrorEvent {
    error!(
        bus = location.bus,
        device = location.device,
        function = location.function,
        threshold = threshold,
        asserted = asserted,
        "FPGA trigger {:?} state",
        state
    );
    ErrorEvent::Thermal {
        location,
        state,
        threshold,
        asserted,
    }
}

/// Poll one port's error registers and AFU power state
pub fn poll_port(location: PciLocation, port: &PortDevice) -> Vec<ErrorEvent> {
    let mut events = Vec::new();
    let index = Some(port.index());
    let mut guard = port.error_state();
    let state = &mut *guard;

    if let Some(base) = port.feature_base(FeatureId::PortError) {
        let error = read_csr64(&base, PortErrorFeature::ERROR);
        let change = state.error.update(error);
        report(&mut events, location, index, ErrorRegister::PortError, change);

        let change = state.first_error.update(read_csr64(&base, PortErrorFeature::FIRST_ERROR));
        report(&mut events, location, index, ErrorRegister::PortFirstError, change);

        // Last-seen values track the hardware every tick; reporting needs a latched error
        let lsb = read_csr64(&base, PortErrorFeature::MALFORMED_REQ_LSB);
        let msb = read_csr64(&base, PortErrorFeature::MALFORMED_REQ_MSB);
        let lsb_changed = state.malformed_lsb.update(lsb).is_some();
        let msb_changed = state.malformed_msb.update(msb).is_some();
        if error != 0 && (lsb_changed || msb_changed) && (lsb | msb) != 0 {
            error!(
                bus = location.bus,
                device = location.device,
                function = location.function,
                port = port.index(),
                lsb = lsb,
                msb = msb,
                "FPGA malformed request"
            );
            events.push(ErrorEvent::MalformedRequest {
                location,
                port: port.index(),
                lsb,
                msb,
            });
        }
    }

    let power = port.status().afu_pwr_state();
    if let Some(change) = state.power_state.update(power) {
        let event = ErrorEvent::PowerState {
            location,
            port: port.index(),
            previous: change.previous(),
            current: power,
        };
        match event.power_state() {
            Some(AfuPowerState::Normal) => info!(
                bus = location.bus,
                device = location.device,
                function = location.function,
                port = port.index(),
                "AFU power state back to normal"
            ),
            other => error!(
                bus = location.bus,
                device = location.device,
                function = location.function,
                port = port.index(),
                raw = power,
                "FPGA trigger {:?} state",
                other
            ),
        }
        events.push(event);
    }

    events
}

/// Poll the FME and every port of a published board
pub fn poll_board(board: &CcipDevice) -> Vec<ErrorEvent> {
    if !board.state().is_live() {
        return Vec::new();
    }
    let location = board.location();
    let mut events = board
        .fme()
        .map(|fme| poll_fme(location, &fme))
        .unwrap_or_default();
    board.for_each_port(|port| events.extend(poll_port(location, port)));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::error::CcipResult;
    use crate::regs::port::{PortHeader, PortStatus};
    use crate::sim::{BoardImage, FeatureChain, PortImage, SimulatedBoard, FME_BAR, PORT_BAR};
    use std::sync::Arc;

    const GERR: usize = 0x1000;
    const THERMAL: usize = 0x2000;
    const PORT_ERR: usize = 0x1000;

    fn board() -> CcipResult<(SimulatedBoard, Arc<FmeDevice>, PortDevice)> {
        let board = BoardImage::new()
            .with_fme_features(
                FeatureChain::new()
                    .feature(GERR, FeatureId::FmeGlobalError)
                    .feature(THERMAL, FeatureId::FmeThermal),
            )
            .with_port(
                PortImage::new().with_features(FeatureChain::new().feature(PORT_ERR, FeatureId::PortError)),
            )
            .build()?;
        let config = DriverConfig::default();
        let fme = Arc::new(FmeDevice::discover(board.bars().bar(FME_BAR)?, &config)?);
        let port = PortDevice::discover(0, board.bars().bar(PORT_BAR)?, &fme, &config)?;
        Ok((board, fme, port))
    }

    #[test]
    fn test_fme_error_edges() -> CcipResult<()> {
        let (sim, fme, _) = board()?;
        let loc = PciLocation::default();
        let error0 = GERR + GlobalErrorFeature::ERROR0;

        let mut count = 0;
        for value in [0, 5, 5, 5, 7, 7, 0] {
            sim.fme.poke(error0, value);
            count += poll_fme(loc, &fme).len();
        }
        assert_eq!(count, 3);
        Ok(())
    }

    #[test]
    fn test_thermal_policy_selects_ap_state() -> CcipResult<()> {
        let (sim, fme, _) = board()?;
        let loc = PciLocation::default();
        let threshold = THERMAL + ThermalFeature::THRESHOLD;

        sim.fme.poke(threshold, TempThreshold(0).with_thshold1_status(1).csr());
        let events = poll_fme(loc, &fme);
        assert!(matches!(
            events.as_slice(),
            [ErrorEvent::Thermal { state: ApState::Ap2, threshold: 1, asserted: true, .. }]
        ));

        sim.fme.poke(
            threshold,
            TempThreshold(0)
                .with_thshold_policy(1)
                .with_thshold2_status(1)
                .csr(),
        );
        let events = poll_fme(loc, &fme);
        assert!(events
            .iter()
            .any(|e| matches!(e, ErrorEvent::Thermal { state: ApState::Ap1, asserted: false, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ErrorEvent::Thermal { state: ApState::Ap6, asserted: true, .. })));
        Ok(())
    }

    fn malformed(events: &[ErrorEvent]) -> Vec<(u64, u64)> {
        events
            .iter()
            .filter_map(|e| match e {
                ErrorEvent::MalformedRequest { lsb, msb, .. } => Some((*lsb, *msb)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_malformed_pair_reported_once_per_change() -> CcipResult<()> {
        let (sim, _, port) = board()?;
        let loc = PciLocation::default();
        sim.ports.poke(PORT_ERR + PortErrorFeature::ERROR, 1 << 16);
        sim.ports.poke(PORT_ERR + PortErrorFeature::MALFORMED_REQ_LSB, 0x123457);
        sim.ports.poke(PORT_ERR + PortErrorFeature::MALFORMED_REQ_MSB, 0x7654321);

        let events = poll_port(loc, &port);
        assert!(matches!(
            events[0],
            ErrorEvent::Register { register: ErrorRegister::PortError, .. }
        ));
        assert_eq!(malformed(&events), vec![(0x123457, 0x7654321)]);
        assert!(poll_port(loc, &port).is_empty());

        sim.ports.poke(PORT_ERR + PortErrorFeature::MALFORMED_REQ_MSB, 0x1);
        assert_eq!(malformed(&poll_port(loc, &port)), vec![(0x123457, 0x1)]);
        Ok(())
    }

    #[test]
    fn test_malformed_last_seen_tracks_while_error_clear() -> CcipResult<()> {
        let (sim, _, port) = board()?;
        let loc = PciLocation::default();
        let error = PORT_ERR + PortErrorFeature::ERROR;
        let lsb = PORT_ERR + PortErrorFeature::MALFORMED_REQ_LSB;

        sim.ports.poke(error, 1);
        sim.ports.poke(lsb, 0xa);
        assert_eq!(malformed(&poll_port(loc, &port)), vec![(0xa, 0)]);

        // Header changes with no error latched: recorded, not reported
        sim.ports.poke(error, 0);
        sim.ports.poke(lsb, 0xb);
        assert!(malformed(&poll_port(loc, &port)).is_empty());

        sim.ports.poke(error, 1);
        let events = poll_port(loc, &port);
        assert!(malformed(&events).is_empty());
        assert_eq!(events.len(), 1);
        Ok(())
    }

    #[test]
    fn test_newly_set_port_error_bits_named() -> CcipResult<()> {
        let (sim, _, port) = board()?;
        let loc = PciLocation::default();
        let error = PORT_ERR + PortErrorFeature::ERROR;

        sim.ports.poke(error, PortErrorBits(0).with_tx_ch0_overflow(1).csr());
        poll_port(loc, &port);

        let bits = PortErrorBits(0)
            .with_tx_ch0_overflow(1)
            .with_tx_ch1_invalidreq(1)
            .with_mmioread_timeout(1);
        sim.ports.poke(error, bits.csr());
        let events = poll_port(loc, &port);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].newly_set(), vec!["tx_ch1_invalidreq", "mmioread_timeout"]);
        Ok(())
    }

    #[test]
    fn test_pr_error_decode() {
        let bits = FmePrError(0).with_crc_err(1).with_timeout_err(1).csr();
        assert_eq!(ErrorRegister::FmePrError.decode(bits), vec!["crc_err", "timeout_err"]);
        assert!(ErrorRegister::FmeError0.decode(bits).is_empty());
    }

    #[test]
    fn test_power_state_transitions() -> CcipResult<()> {
        let (sim, _, port) = board()?;
        let loc = PciLocation::default();
        sim.ports.poke(PortHeader::STATUS, PortStatus(0).with_afu_pwr_state(6).csr());
        let events = poll_port(loc, &port);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].power_state(), Some(AfuPowerState::Ap6));

        assert!(poll_port(loc, &port).is_empty());
        sim.ports.poke(PortHeader::STATUS, 0);
        assert_eq!(poll_port(loc, &port)[0].power_state(), Some(AfuPowerState::Normal));
        Ok(())
    }
}
