//! Background error polling thread

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use super::errors::{poll_board, ErrorEvent};
use crate::device::BoardRegistry;
use crate::error::{CcipError, CcipResult};
use crate::utils::LogExt;

/// Name of the polling thread
pub const POLLER_THREAD_NAME: &str = "ccip-logging";

/// Poll every registered board once
///
/// The registry stays read-locked for the whole pass, so boards cannot be
/// removed while their registers are being read.
pub fn poll_registry(registry: &BoardRegistry) -> Vec<ErrorEvent> {
    let mut events = Vec::new();
    registry.for_each(|board| events.extend(poll_board(board)));
    events
}

/// Periodic poller over a [`BoardRegistry`]
#[derive(Debug)]
pub struct ErrorPoller {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    passes: Arc<AtomicU64>,
}

impl ErrorPoller {
    /// Spawn the polling thread
    ///
    /// Every `interval` the thread polls all boards. Events are forwarded to
    /// `events` when given; a closed receiver is ignored.
    ///
    /// # Errors
    /// Returns `Io` if the thread cannot be spawned
    pub fn start(
        registry: Arc<BoardRegistry>,
        interval: Duration,
        events: Option<Sender<ErrorEvent>>,
    ) -> CcipResult<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let passes = Arc::new(AtomicU64::new(0));
        let counter = passes.clone();

        let handle = thread::Builder::new()
            .name(POLLER_THREAD_NAME.to_string())
            .spawn(move || {
                debug!("Error poller running every {:?}", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let found = poll_registry(&registry);
                    counter.fetch_add(1, Ordering::SeqCst);
                    if let Some(tx) = &events {
                        for event in found {
                            let _ = tx.send(event);
                        }
                    }
                }
                debug!("Error poller exiting");
            })?;

        info!("Started {} thread", POLLER_THREAD_NAME);
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
            passes,
        })
    }

    /// Completed polling passes
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the thread and wait for it to exit
    ///
    /// # Errors
    /// Returns `InvalidState` if the thread panicked
    pub fn stop(&mut self) -> CcipResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        handle
            .join()
            .map_err(|_| CcipError::invalid_state("error poller panicked"))?;
        info!("Stopped {} thread", POLLER_THREAD_NAME);
        Ok(())
    }
}

impl Drop for ErrorPoller {
    fn drop(&mut self) {
        self.stop().log_warning("Stopping error poller");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_poller_runs_and_stops() -> CcipResult<()> {
        let registry = Arc::new(BoardRegistry::new());
        let mut poller = ErrorPoller::start(registry, Duration::from_millis(5), None)?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while poller.passes() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(poller.passes() >= 2);

        poller.stop()?;
        assert!(!poller.is_running());
        let after = poller.passes();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(poller.passes(), after);
        poller.stop()
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() -> CcipResult<()> {
        let registry = Arc::new(BoardRegistry::new());
        let mut poller = ErrorPoller::start(registry, Duration::from_secs(3600), None)?;
        let started = Instant::now();
        poller.stop()?;
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(poller.passes(), 0);
        Ok(())
    }
}
