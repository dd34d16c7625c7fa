//! Register monitoring: error and power-state logging, performance counters

mod edge;
mod errors;
mod perf;
mod poller;

pub use edge::{EdgeDetector, Transition};
pub use errors::{
    poll_board, poll_fme, poll_port, ApState, ErrorEvent, ErrorRegister, FmeErrorState,
    PortErrorState,
};
pub use perf::{
    get_perfmon_counters, PerfCounters, CACHE_EVENT_COUNTER_MAX_TRY, PERF_MONITOR_COUNT,
    PERF_MONITOR_VERSION,
};
pub use poller::{poll_registry, ErrorPoller, POLLER_THREAD_NAME};
