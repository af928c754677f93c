//! Error taxonomy for the library's small number of genuine `Result`
//! boundaries.
//!
//! Most of the crate treats a precondition violation as a no-op returning
//! `false`/`None`, not a `Result`. `thiserror` backs only the operations
//! where a caller actually needs to distinguish *why* a call failed:
//! message attribute access, and arbiter construction.

use thiserror::Error;

/// Failure modes for [`crate::message::Message`] attribute access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message has no attribute named `{name}`")]
    NoSuchName { name: String },
    #[error("attribute `{name}` is not of the requested type")]
    TypeMismatch { name: String },
}

/// Failure modes for [`crate::arbiter::Arbiter`] construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError {
    #[error("arbiter_coordinate requires at least one of exclusive, concurrent or teardown")]
    NoReceivers,
}
