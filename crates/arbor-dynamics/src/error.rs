//! Error types for arbor-dynamics.
//!
//! Precondition violations (negative mass, out-of-range coefficients, NaN
//! intermediates) are programmer errors and fail fast via assertions; the
//! only recoverable failures are requests for traversal policies that do not
//! exist yet.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynamicsError {
    #[error("inverse kinematics policy `{0}` is not implemented")]
    NotImplemented(&'static str),
}

pub type Result<T> = std::result::Result<T, DynamicsError>;
