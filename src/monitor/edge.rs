//! Edge-triggered register differencing

/// A change between two polls of one register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The register moved to a nonzero value
    Raised { previous: u64, current: u64 },
    /// The register returned to zero
    Cleared { previous: u64 },
}

impl Transition {
    pub fn current(&self) -> u64 {
        match self {
            Transition::Raised { current, .. } => *current,
            Transition::Cleared { .. } => 0,
        }
    }

    pub fn previous(&self) -> u64 {
        match self {
            Transition::Raised { previous, .. } | Transition::Cleared { previous } => *previous,
        }
    }
}

/// Last-seen copy of one register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeDetector {
    last: u64,
}

impl EdgeDetector {
    pub const fn new(initial: u64) -> Self {
        Self { last: initial }
    }

    /// Record `current`, reporting a transition if it differs from the last poll
    pub fn update(&mut self, current: u64) -> Option<Transition> {
        let previous = std::mem::replace(&mut self.last, current);
        match (previous == current, current) {
            (true, _) => None,
            (false, 0) => Some(Transition::Cleared { previous }),
            (false, current) => Some(Transition::Raised { previous, current }),
        }
    }

    pub const fn last(&self) -> u64 {
        self.last
    }
}
