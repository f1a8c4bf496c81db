//! Error types for the stage.

use crate::lifecycle::PortPhase;
use thiserror::Error;

/// Result type alias using the crate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for stage operations.
///
/// A port with no buffer to claim is not represented here: brokers return
/// `Ok(None)` from a claim and the controller defers to the next
/// notification.
#[derive(Error, Debug)]
pub enum Error {
    /// The transform step could not process the held buffers.
    #[error("transform failed: {0}")]
    TransformFailure(String),

    /// An internal ownership invariant was breached.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A lifecycle operation was invoked out of order.
    #[error("lifecycle order violation: {operation} not allowed in phase {phase}")]
    LifecycleOrderViolation {
        /// The rejected operation.
        operation: &'static str,
        /// The phase the offending port was in.
        phase: PortPhase,
    },

    /// Per-port resource allocation failed.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// Invalid stage configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transform rejected its input.
    Transform,
    /// Stage controller bug.
    Protocol,
    /// Host drove the lifecycle out of order.
    Lifecycle,
    /// Resource allocation failure.
    Resource,
    /// Bad configuration.
    Config,
}

impl ErrorKind {
    /// Whether this kind indicates a bug rather than a runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol)
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransformFailure(_) => ErrorKind::Transform,
            Self::ProtocolViolation(_) => ErrorKind::Protocol,
            Self::LifecycleOrderViolation { .. } => ErrorKind::Lifecycle,
            Self::AllocationFailed(_) => ErrorKind::Resource,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::TransformFailure("bad".into()).kind(),
            ErrorKind::Transform
        );
        assert!(Error::protocol("double claim").kind().is_fatal());
        assert!(!Error::AllocationFailed("oom".into()).kind().is_fatal());
    }

    #[test]
    fn test_lifecycle_error_message() {
        let err = Error::LifecycleOrderViolation {
            operation: "on_buffers_ready",
            phase: PortPhase::Prepared,
        };
        assert_eq!(
            err.to_string(),
            "lifecycle order violation: on_buffers_ready not allowed in phase Prepared"
        );
    }
}
