// src/error.rs

//! # Configuration Errors
//!
//! Every fault this crate can report is a configuration-time fault. Once a
//! component has been built, its per-frame methods never fail.

use alloc::string::String;
use thiserror::Error;

/// Errors raised while building controllers, allocators, and sequencers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A saturation range has its lower limit above its upper limit.
    #[error("{what}[{index}]: lower limit exceeds upper limit")]
    InvalidLimits {
        /// The item whose limits are invalid.
        what: &'static str,
        /// Element index within the item.
        index: usize,
    },

    /// Two dimensions that must agree do not.
    #[error("{what}: expected {expected} elements, found {found}")]
    DimensionMismatch {
        /// The mismatched item.
        what: &'static str,
        /// Expected size.
        expected: usize,
        /// Actual size.
        found: usize,
    },

    /// A table or matrix that must hold data is empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// A table or matrix exceeds the fixed capacity of the flight code.
    #[error("{what}: at most {max} supported, found {found}")]
    TooMany {
        /// The oversized item.
        what: &'static str,
        /// Supported maximum.
        max: usize,
        /// Requested size.
        found: usize,
    },

    /// A gain, limit, or matrix entry is NaN or infinite.
    #[error("{0} contains a non-finite value")]
    NonFinite(&'static str),

    /// A weighting matrix that must be inverted is singular.
    #[error("{0} weighting matrix is singular")]
    SingularWeight(&'static str),

    /// The linear algebra backend could not build the solve operator.
    #[error("allocation solver setup failed: {0}")]
    Solver(&'static str),

    /// A test point references a group name that was never defined.
    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// A time step that must be positive is not.
    #[error("{0} must be positive")]
    InvalidDt(&'static str),
}
