//! Board object: one FME, its ports and every AAL-facing wrapper

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use super::fme::FmeDevice;
use super::lifecycle::DeviceState;
use super::port::PortDevice;
use super::PciLocation;
use crate::aal::{select_pip, AalAddress, AalDeviceKind, AalFramework, CciAalDevice};
use crate::config::DriverConfig;
use crate::csr::{BarSet, CsrBase, FME_BAR};
use crate::error::{CcipError, CcipResult};
use crate::monitor::{get_perfmon_counters, poll_board, ErrorEvent, PerfCounters};
use crate::regs::fme::MAX_PORTS;
use crate::regs::FeatureId;
use crate::utils::Stopwatch;

/// A probed CCI-P board
pub struct CcipDevice {
    location: PciLocation,
    bars: BarSet,
    framework: Arc<dyn AalFramework>,
    perf_tries: usize,
    fme: RwLock<Option<Arc<FmeDevice>>>,
    ports: RwLock<Vec<Arc<PortDevice>>>,
    aal_devices: Mutex<Vec<CciAalDevice>>,
    state: Mutex<DeviceState>,
}

impl fmt::Debug for CcipDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CcipDevice")
            .field("location", &format_args!("{}", self.location))
            .field("state", &self.state())
            .field("ports", &self.port_count())
            .field("aal_devices", &self.aal_device_count())
            .finish()
    }
}

impl CcipDevice {
    /// Discover the FME and every implemented port, then create and publish
    /// the AAL wrappers
    ///
    /// Nothing stays registered with the framework when this fails.
    ///
    /// # Errors
    /// Returns `CcipError` if a header or feature list is malformed, a BAR is
    /// missing, or the framework rejects a device
    pub fn probe(
        location: PciLocation,
        bars: BarSet,
        framework: Arc<dyn AalFramework>,
        config: &DriverConfig,
    ) -> CcipResult<Arc<Self>> {
        info!(%location, "Probing CCI-P board");
        let timer = Stopwatch::start();
        let fme = Arc::new(FmeDevice::discover(bars.bar(FME_BAR)?, config)?);

        let port_slots = config.max_ports.min(MAX_PORTS);
        let mut ports = Vec::new();
        ports
            .try_reserve_exact(port_slots)
            .map_err(|_| CcipError::out_of_memory("port list"))?;
        for index in 0..port_slots {
            let offset = fme.header().port_offsets[index];
            if !offset.is_implemented() {
                debug!(%location, "Port {} not implemented", index);
                continue;
            }
            let base = bars
                .bar(offset.port_bar() as usize)?
                .at(offset.port_offset() as usize);
            ports.push(Arc::new(PortDevice::discover(index, base, &fme, config)?));
        }

        let mut state = DeviceState::Created;
        state.advance(DeviceState::Populated)?;

        let wrappers = create_wrappers(&location, &fme, &ports, framework.as_ref())?;
        for wrapper in &wrappers {
            if let Err(e) = wrapper.publish(framework.as_ref()) {
                error!(%location, "Publishing {} failed: {}", wrapper.name(), e);
                destroy_wrappers(&wrappers, framework.as_ref());
                return Err(e);
            }
        }
        state.advance(DeviceState::Published)?;

        let board = Arc::new(Self {
            location,
            bars,
            framework,
            perf_tries: config.perf_event_max_tries,
            fme: RwLock::new(Some(fme)),
            ports: RwLock::new(ports),
            aal_devices: Mutex::new(wrappers),
            state: Mutex::new(state),
        });
        board.for_each_port(|port| port.attach_board(Arc::downgrade(&board)));
        info!(
            %location,
            "Board published with {} ports, {} AAL devices in {:?}",
            board.port_count(),
            board.aal_device_count(),
            timer.stop()
        );
        Ok(board)
    }

    pub fn location(&self) -> PciLocation {
        self.location
    }

    pub fn bars(&self) -> &BarSet {
        &self.bars
    }

    pub fn state(&self) -> DeviceState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_wrappers(&self) -> MutexGuard<'_, Vec<CciAalDevice>> {
        self.aal_devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The FME, until teardown
    pub fn fme(&self) -> Option<Arc<FmeDevice>> {
        self.fme.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Snapshot of the implemented ports
    pub fn ports(&self) -> Vec<Arc<PortDevice>> {
        self.ports.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn port(&self, index: usize) -> Option<Arc<PortDevice>> {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.index() == index)
            .cloned()
    }

    pub fn port_count(&self) -> usize {
        self.ports.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run `f` on every port with the port list read-locked
    pub fn for_each_port(&self, mut f: impl FnMut(&PortDevice)) {
        let ports = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        for port in ports.iter() {
            f(port);
        }
    }

    pub fn aal_device_count(&self) -> usize {
        self.lock_wrappers().len()
    }

    /// Addresses of every AAL wrapper, in creation order
    pub fn addresses(&self) -> Vec<AalAddress> {
        self.lock_wrappers().iter().map(|w| w.address()).collect()
    }

    /// Run `f` on every AAL wrapper with the wrapper list locked
    pub fn for_each_aal_device(&self, mut f: impl FnMut(&CciAalDevice)) {
        for wrapper in self.lock_wrappers().iter() {
            f(wrapper);
        }
    }

    /// Poll error, thermal and power-state registers once
    pub fn poll_errors(&self) -> Vec<ErrorEvent> {
        poll_board(self)
    }

    /// Sample the FME's global performance counters
    ///
    /// # Errors
    /// Returns `InvalidState` on a torn-down board and `FeatureAbsent` when the
    /// FME has no performance monitor
    pub fn perf_counters(&self) -> CcipResult<PerfCounters> {
        let fme = self
            .fme()
            .ok_or_else(|| CcipError::invalid_state(format!("board {} torn down", self.location)))?;
        get_perfmon_counters(&fme, self.perf_tries)
    }

    /// Re-walk the FME and port feature lists, keeping what was found
    pub fn rescan(&self) {
        if let Some(fme) = self.fme() {
            fme.rescan();
        }
        self.for_each_port(|port| {
            port.rescan();
        });
    }

    /// Tear the board down: wrappers, then ports, then the FME
    ///
    /// # Errors
    /// Returns `InvalidState` when called on a destroyed board
    pub fn destroy(&self) -> CcipResult<()> {
        let mut state = self.lock_state();
        if !state.can_transition_to(DeviceState::Destroyed)
            && !state.can_transition_to(DeviceState::Unpublished)
        {
            return Err(CcipError::invalid_state(format!(
                "board {} already {}",
                self.location, *state
            )));
        }

        let wrappers = std::mem::take(&mut *self.lock_wrappers());
        destroy_wrappers(&wrappers, self.framework.as_ref());

        let ports = std::mem::take(&mut *self.ports.write().unwrap_or_else(PoisonError::into_inner));
        debug!(location = %self.location, "Releasing {} ports", ports.len());
        drop(ports);
        self.fme.write().unwrap_or_else(PoisonError::into_inner).take();

        if *state == DeviceState::Published {
            state.advance(DeviceState::Unpublished)?;
        }
        state.advance(DeviceState::Destroyed)?;
        info!(location = %self.location, "Board destroyed");
        Ok(())
    }
}

/// Create the FME wrapper and each port's Port, Signal-Tap, PR and AFU
/// wrappers; on failure every wrapper created so far is destroyed
fn create_wrappers(
    location: &PciLocation,
    fme: &FmeDevice,
    ports: &[Arc<PortDevice>],
    framework: &dyn AalFramework,
) -> CcipResult<Vec<CciAalDevice>> {
    let mut plan: Vec<(AalDeviceKind, AalAddress, CsrBase)> = Vec::new();
    plan.try_reserve_exact(1 + ports.len() * 4)
        .map_err(|_| CcipError::out_of_memory("AAL device list"))?;

    plan.push((AalDeviceKind::Fme, AalAddress::fme(location), fme.base().clone()));
    for port in ports {
        let subdevice = port.index() as u16;
        let port_base = port.base().clone();
        let feature_or_port = |id| port.feature_base(id).unwrap_or_else(|| port_base.clone());

        plan.push((
            AalDeviceKind::Port,
            AalAddress::port(location, subdevice, AalDeviceKind::Port),
            port_base.clone(),
        ));
        plan.push((
            AalDeviceKind::SignalTap,
            AalAddress::port(location, subdevice, AalDeviceKind::SignalTap),
            feature_or_port(FeatureId::PortSignalTap),
        ));
        plan.push((
            AalDeviceKind::Pr,
            AalAddress::port(location, subdevice, AalDeviceKind::Pr),
            feature_or_port(FeatureId::PortPr),
        ));
        match port.afu() {
            Some(afu) => plan.push((
                AalDeviceKind::UserAfu,
                AalAddress::port(location, subdevice, AalDeviceKind::UserAfu),
                afu.base().clone(),
            )),
            None => info!(%location, "Port {} has no AFU", port.index()),
        }
    }

    let mut wrappers = Vec::new();
    wrappers
        .try_reserve_exact(plan.len())
        .map_err(|_| CcipError::out_of_memory("AAL device list"))?;
    for (kind, address, base) in plan {
        let len = base.window_len();
        let pip = select_pip(kind.pip_kind(), base, len);
        match CciAalDevice::create(framework, kind, address, pip) {
            Ok(wrapper) => wrappers.push(wrapper),
            Err(e) => {
                error!(%location, "Creating {} at {} failed: {}", kind, address, e);
                destroy_wrappers(&wrappers, framework);
                return Err(e);
            }
        }
    }
    Ok(wrappers)
}

/// Unpublish and destroy wrappers in reverse creation order
fn destroy_wrappers(wrappers: &[CciAalDevice], framework: &dyn AalFramework) {
    for wrapper in wrappers.iter().rev() {
        if let Err(e) = wrapper.destroy(framework) {
            warn!("Destroying {} failed: {}", wrapper.name(), e);
        }
    }
}
