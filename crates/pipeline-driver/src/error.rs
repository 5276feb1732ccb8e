//! Error types for the pipeline driver.

use thiserror::Error;

use crate::msg::MsgKind;

/// Errors surfaced by the driver and its host endpoints.
///
/// `ContractViolation` and `Configuration` are fatal: the animator thread never continues
/// past them (see [`crate::config::FatalAction`]).
#[derive(Error, Debug)]
pub enum DriverError {
    /// A message arrived that is invalid for the animator's current state.
    #[error("contract violation: {kind:?} received while {state}")]
    ContractViolation { kind: MsgKind, state: &'static str },

    /// The host platform rejected the requested stream format.
    #[error("endpoint configuration error: {0}")]
    Configuration(String),

    /// The stream descriptor itself is not representable by the driver.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The host endpoint could not be created or has gone away.
    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// The animator thread panicked before it could report an error.
    #[error("animator thread panicked")]
    AnimatorPanicked,
}

impl DriverError {
    pub(crate) fn violation(kind: MsgKind, state: &'static str) -> Self {
        Self::ContractViolation { kind, state }
    }

    /// Whether this error must terminate the animator.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation { .. } | Self::Configuration(_) | Self::UnsupportedFormat(_)
        )
    }
}

/// Convenience Result type using [`DriverError`].
pub type Result<T> = std::result::Result<T, DriverError>;
