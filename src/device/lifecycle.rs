//! Board and wrapper lifecycle states

use std::fmt;

use crate::error::{CcipError, CcipResult};

/// `Created → Populated → Published → Unpublished → Destroyed`
///
/// An object that never reached `Published` may go straight to `Destroyed`
/// when construction is rolled back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    Created,
    /// Features discovered
    Populated,
    /// Visible on the AAL bus
    Published,
    Unpublished,
    Destroyed,
}

impl DeviceState {
    pub fn can_transition_to(self, next: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (self, next),
            (Created, Populated)
                | (Populated, Published)
                | (Published, Unpublished)
                | (Unpublished, Destroyed)
                | (Created, Destroyed)
                | (Populated, Destroyed)
        )
    }

    /// Move to `next`, or fail without changing state
    pub fn advance(&mut self, next: DeviceState) -> CcipResult<()> {
        if !self.can_transition_to(next) {
            return Err(CcipError::invalid_state(format!("{self} -> {next}")));
        }
        *self = next;
        Ok(())
    }

    pub fn is_live(self) -> bool {
        self == DeviceState::Published
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Created => "created",
            DeviceState::Populated => "populated",
            DeviceState::Published => "published",
            DeviceState::Unpublished => "unpublished",
            DeviceState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() -> CcipResult<()> {
        let mut state = DeviceState::default();
        for next in [
            DeviceState::Populated,
            DeviceState::Published,
            DeviceState::Unpublished,
            DeviceState::Destroyed,
        ] {
            state.advance(next)?;
        }
        assert_eq!(state, DeviceState::Destroyed);
        Ok(())
    }

    #[test]
    fn test_rejected_transitions() {
        let mut state = DeviceState::Published;
        assert!(state.advance(DeviceState::Destroyed).is_err());
        assert_eq!(state, DeviceState::Published);

        let mut destroyed = DeviceState::Destroyed;
        assert!(destroyed.advance(DeviceState::Destroyed).is_err());
        assert!(DeviceState::Populated.can_transition_to(DeviceState::Destroyed));
    }
}
