//! Error handling for the CCI-P FPGA driver

use thiserror::Error;

/// Errno values used when an error crosses the probe boundary
mod errno {
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EBUSY: i32 = 16;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
}

/// Comprehensive error enum for the CCI-P FPGA driver
#[derive(Debug, Error)]
pub enum CcipError {
    /// CSR access through a null base address
    #[error("CSR base address is null")]
    NullBase,

    /// CSR access outside the mapped region
    #[error("CSR offset {offset:#x} outside mapped region of {len:#x} bytes")]
    OutOfRange {
        /// Byte offset that was accessed
        offset: usize,
        /// Length of the mapped region
        len: usize,
    },

    /// CSR access at an offset that is not 8-byte aligned
    #[error("CSR offset {offset:#x} is not 8-byte aligned")]
    Misaligned {
        /// Byte offset that was accessed
        offset: usize,
    },

    /// Allocation of a device object or feature copy failed
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// A nested feature header did not carry the private type
    #[error("Invalid feature type {found:#x} at offset {offset:#x}")]
    InvalidFeatureType {
        /// Offset of the offending header
        offset: usize,
        /// Raw type field that was found
        found: u8,
    },

    /// A top-level FME or Port header did not carry the AFU type
    #[error("Invalid {header} header type {found:#x}")]
    InvalidHeaderType {
        /// Which header was being read
        header: &'static str,
        /// Raw type field that was found
        found: u8,
    },

    /// The feature list did not terminate within the iteration cap
    #[error("Feature list exceeds {limit} nodes")]
    FeatureListTooLong {
        /// Configured node cap
        limit: usize,
    },

    /// The all-ones sentinel was read where a header was expected
    #[error("Device absent at offset {offset:#x}")]
    DeviceAbsent {
        /// Offset of the unresponsive header
        offset: usize,
    },

    /// A port refers to a BAR that is not mapped
    #[error("PCI BAR {bar} is not mapped")]
    MissingBar {
        /// BAR index
        bar: usize,
    },

    /// A required sub-feature was not discovered
    #[error("Feature {0} not present")]
    FeatureAbsent(&'static str),

    /// The AAL device framework rejected an operation
    #[error("AAL framework {operation} failed: {reason}")]
    Framework {
        /// Collaborator operation that failed
        operation: &'static str,
        /// Reason reported by the framework
        reason: String,
    },

    /// An object is not in a state that permits the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Underlying I/O error while mapping a BAR
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CcipError {
    /// Create a framework error
    pub fn framework(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Framework {
            operation,
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState(state.into())
    }

    /// Create an allocation failure error
    pub fn out_of_memory(what: impl Into<String>) -> Self {
        Self::OutOfMemory(what.into())
    }

    /// Structural errors are faults in the feature list layout itself
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CcipError::InvalidFeatureType { .. }
                | CcipError::InvalidHeaderType { .. }
                | CcipError::FeatureListTooLong { .. }
        )
    }
}

/// Error extension trait for additional error handling capabilities
pub trait ErrorExt {
    /// Determines if the error is potentially recoverable
    fn is_recoverable(&self) -> bool;

    /// Provides a detailed error context
    fn context(&self) -> Option<&str>;

    /// Negative errno reported at the probe boundary
    fn errno(&self) -> i32;
}

impl ErrorExt for CcipError {
    fn is_recoverable(&self) -> bool {
        match self {
            CcipError::OutOfMemory(_) => true,
            CcipError::InvalidFeatureType { .. } => true,
            CcipError::InvalidHeaderType { .. } => true,
            CcipError::FeatureListTooLong { .. } => true,
            CcipError::DeviceAbsent { .. } => true,
            CcipError::FeatureAbsent(_) => true,
            CcipError::Framework { .. } => true,
            CcipError::NullBase => false,
            CcipError::OutOfRange { .. } => false,
            CcipError::Misaligned { .. } => false,
            CcipError::MissingBar { .. } => false,
            CcipError::InvalidState(_) => false,
            CcipError::Io(_) => false,
        }
    }

    fn context(&self) -> Option<&str> {
        match self {
            CcipError::OutOfMemory(ctx) => Some(ctx),
            CcipError::InvalidState(ctx) => Some(ctx),
            CcipError::FeatureAbsent(ctx) => Some(ctx),
            CcipError::InvalidHeaderType { header, .. } => Some(header),
            CcipError::Framework { reason, .. } => Some(reason),
            _ => None,
        }
    }

    fn errno(&self) -> i32 {
        let code = match self {
            CcipError::OutOfMemory(_) => errno::ENOMEM,
            CcipError::DeviceAbsent { .. } | CcipError::MissingBar { .. } => errno::ENODEV,
            CcipError::FeatureAbsent(_) => errno::ENODEV,
            CcipError::InvalidState(_) => errno::EBUSY,
            CcipError::Framework { .. } | CcipError::Io(_) => errno::EIO,
            CcipError::NullBase
            | CcipError::OutOfRange { .. }
            | CcipError::Misaligned { .. }
            | CcipError::InvalidFeatureType { .. }
            | CcipError::InvalidHeaderType { .. }
            | CcipError::FeatureListTooLong { .. } => errno::EINVAL,
        };
        -code
    }
}

/// Convenience result type using CcipError
pub type CcipResult<T> = Result<T, CcipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(CcipError::out_of_memory("fme").errno(), -12);
        assert_eq!(
            CcipError::InvalidFeatureType { offset: 0x1000, found: 1 }.errno(),
            -22
        );
        assert_eq!(CcipError::DeviceAbsent { offset: 0 }.errno(), -19);
        assert_eq!(CcipError::framework("publish", "bus gone").errno(), -5);
    }

    #[test]
    fn test_structural_classification() {
        assert!(CcipError::InvalidHeaderType { header: "Port", found: 3 }.is_structural());
        assert!(CcipError::FeatureListTooLong { limit: 64 }.is_structural());
        assert!(!CcipError::NullBase.is_structural());
        assert!(!CcipError::DeviceAbsent { offset: 0 }.is_structural());
    }

    #[test]
    fn test_context() {
        let err = CcipError::framework("create_device", "no slot");
        assert_eq!(err.context(), Some("no slot"));
        assert!(err.is_recoverable());
        assert_eq!(CcipError::NullBase.context(), None);
    }
}
