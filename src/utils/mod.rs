//! Small helpers shared by the driver

use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::error::CcipError;

/// Utility for timing operations
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Create and start a new stopwatch
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time since `start`
    pub fn stop(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Log the error side of a result without consuming it
pub trait LogExt {
    fn log_error(&self, context: &str);

    fn log_warning(&self, context: &str);
}

impl<T> LogExt for Result<T, CcipError> {
    fn log_error(&self, context: &str) {
        if let Err(e) = self {
            error!("{}: {}", context, e);
        }
    }

    fn log_warning(&self, context: &str) {
        if let Err(e) = self {
            warn!("{}: {}", context, e);
        }
    }
}
