//! Driver configuration

use std::time::Duration;

use crate::dfl::DEFAULT_MAX_NODES;
use crate::monitor::CACHE_EVENT_COUNTER_MAX_TRY;
use crate::regs::fme::MAX_PORTS;

/// Tunables shared by probing, polling and perf sampling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Period of the error logging timer
    pub poll_interval: Duration,

    /// Feature-list nodes visited before a walk is abandoned
    pub max_feature_nodes: usize,

    /// `port_offsets[]` entries examined during probe, capped at 4
    pub max_ports: usize,

    /// Reads spent waiting for a perf counter to report the selected event
    pub perf_event_max_tries: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_feature_nodes: DEFAULT_MAX_NODES,
            max_ports: MAX_PORTS,
            perf_event_max_tries: CACHE_EVENT_COUNTER_MAX_TRY,
        }
    }
}

impl DriverConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_feature_nodes(mut self, nodes: usize) -> Self {
        self.max_feature_nodes = nodes;
        self
    }

    /// Values above the hardware's four port slots are clamped
    pub fn with_max_ports(mut self, ports: usize) -> Self {
        self.max_ports = ports.min(MAX_PORTS);
        self
    }

    pub fn with_perf_event_max_tries(mut self, tries: usize) -> Self {
        self.perf_event_max_tries = tries;
        self
    }
}
