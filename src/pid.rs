// src/pid.rs

//! # PID Control Module
//!
//! This module provides the compute callback and control data structure for
//! reference-scaled PID control, and the mode-aware scalar controller built
//! on top of them.

pub mod function;
pub use function::*;
pub mod scaled;
pub use scaled::*;
