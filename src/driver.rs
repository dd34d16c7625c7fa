//! Driver coordinator: board registry, AAL framework and the logging timer

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info};

use crate::aal::AalFramework;
use crate::config::DriverConfig;
use crate::csr::BarSet;
use crate::device::{BoardRegistry, CcipDevice, PciLocation};
use crate::error::{CcipError, CcipResult};
use crate::monitor::{poll_registry, ErrorEvent, ErrorPoller, PerfCounters};
use crate::utils::LogExt;

/// One loaded driver instance
pub struct CcipDriver {
    config: DriverConfig,
    framework: Arc<dyn AalFramework>,
    registry: Arc<BoardRegistry>,
    poller: Mutex<Option<ErrorPoller>>,
}

impl std::fmt::Debug for CcipDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CcipDriver")
            .field("config", &self.config)
            .field("boards", &self.registry.len())
            .finish()
    }
}

impl CcipDriver {
    /// Create the registry and start the logging timer
    ///
    /// # Errors
    /// Returns `Io` if the polling thread cannot be spawned
    pub fn load(framework: Arc<dyn AalFramework>, config: DriverConfig) -> CcipResult<Self> {
        Self::start(framework, config, None)
    }

    /// Like [`load`](Self::load), forwarding every polled event to `events`
    ///
    /// # Errors
    /// Returns `Io` if the polling thread cannot be spawned
    pub fn load_with_events(
        framework: Arc<dyn AalFramework>,
        config: DriverConfig,
        events: Sender<ErrorEvent>,
    ) -> CcipResult<Self> {
        Self::start(framework, config, Some(events))
    }

    fn start(
        framework: Arc<dyn AalFramework>,
        config: DriverConfig,
        events: Option<Sender<ErrorEvent>>,
    ) -> CcipResult<Self> {
        let registry = Arc::new(BoardRegistry::new());
        let poller = ErrorPoller::start(registry.clone(), config.poll_interval, events)?;
        info!("CCI-P driver loaded, polling every {:?}", config.poll_interval);
        Ok(Self {
            config,
            framework,
            registry,
            poller: Mutex::new(Some(poller)),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BoardRegistry> {
        &self.registry
    }

    /// Construct, publish and register the board at `location`
    ///
    /// # Errors
    /// Returns `InvalidState` if a board is already registered there, or the
    /// error from [`CcipDevice::probe`]
    pub fn probe(&self, location: PciLocation, bars: BarSet) -> CcipResult<Arc<CcipDevice>> {
        if self.registry.find(location).is_some() {
            return Err(CcipError::invalid_state(format!(
                "board {location} already probed"
            )));
        }
        let board = CcipDevice::probe(location, bars, self.framework.clone(), &self.config)?;
        if let Err(e) = self.registry.add(board.clone()) {
            board.destroy()?;
            return Err(e);
        }
        Ok(board)
    }

    /// Map the board's BARs through sysfs and probe it
    ///
    /// # Errors
    /// Returns `Io` if a BAR resource cannot be opened or mapped, or the error
    /// from [`probe`](Self::probe)
    #[cfg(feature = "pcie")]
    pub fn probe_sysfs(&self, location: PciLocation) -> CcipResult<Arc<CcipDevice>> {
        let bars = crate::csr::mapped::map_device_bars(&location)?;
        self.probe(location, bars)
    }

    /// Unregister the board at `location`, then tear it down
    ///
    /// The board leaves the registry first so no polling pass can reach it;
    /// teardown then runs wrappers, ports, FME as in [`CcipDevice::destroy`].
    /// The registry lock is held only for the unlink.
    ///
    /// # Errors
    /// Returns `InvalidState` if no board is registered at `location`, or the
    /// teardown error
    pub fn remove(&self, location: PciLocation) -> CcipResult<()> {
        let board = self
            .registry
            .remove(location)
            .ok_or_else(|| CcipError::invalid_state(format!("no board at {location}")))?;
        board.destroy()
    }

    /// Poll every board once from the calling thread
    pub fn poll_once(&self) -> Vec<ErrorEvent> {
        poll_registry(&self.registry)
    }

    /// Sample the performance counters of the board at `location`
    ///
    /// # Errors
    /// Returns `InvalidState` if no board is registered there, or the error
    /// from [`CcipDevice::perf_counters`]
    pub fn perf_counters(&self, location: PciLocation) -> CcipResult<PerfCounters> {
        self.registry
            .find(location)
            .ok_or_else(|| CcipError::invalid_state(format!("no board at {location}")))?
            .perf_counters()
    }

    /// Stop the timer, waiting for an in-flight pass, then tear down every board
    ///
    /// # Errors
    /// Returns `InvalidState` if the polling thread panicked, otherwise the
    /// first teardown error; every board is still attempted
    pub fn unload(self) -> CcipResult<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> CcipResult<()> {
        let poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut poller) = poller {
            poller.stop()?;
        }

        let mut first_error = None;
        for board in self.registry.drain() {
            if let Err(e) = board.destroy() {
                error!(location = %board.location(), "Teardown failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for CcipDriver {
    fn drop(&mut self) {
        self.shutdown().log_error("Driver unload failed");
    }
}
