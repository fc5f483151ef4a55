// src/mode.rs

//! # Shared Controller Modes
//!
//! A single run-mode enumeration is consumed by every controller in the
//! crate: scalar loops, controller banks, the block system, and the
//! sequencer output. This module also carries the numeric bound used by the
//! generic PID code and the saturation flag reported by saturating blocks.

use piddiy::Number as PiddiyNumber;
use serde::Deserialize;

/// Custom trait to encapsulate base number requirements.
pub trait Number: PiddiyNumber {
    /// Clamps generic PartialOrd values within a given range.
    fn clamp(self, min: Self, max: Self) -> Self {
        if self < min {
            min
        } else if max < self {
            max
        } else {
            self
        }
    }

    /// False for NaN and infinities. Fixed-point values are always finite.
    fn finite(self) -> bool {
        self - self == Self::zero()
    }
}

impl<T: PiddiyNumber> Number for T {}

/// Run mode of a controller.
///
/// `Reset` is transient: a controller stepped in `Reset` zeroes its state and
/// drops to `Standby` on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CtrlMode {
    /// Zero the state and command, then fall through to `Standby`.
    Reset,
    /// Inert. State and command are left unchanged.
    #[default]
    Standby,
    /// Compute the command from the frozen state.
    Hold,
    /// Back-solve the state so the command matches an external command.
    Init,
    /// Advance the state and compute the command.
    Engage,
}

impl CtrlMode {
    /// Numeric code recorded in log snapshots.
    pub fn code(self) -> i8 {
        match self {
            CtrlMode::Reset => -1,
            CtrlMode::Standby => 0,
            CtrlMode::Hold => 1,
            CtrlMode::Init => 2,
            CtrlMode::Engage => 3,
        }
    }
}

/// Which limit, if any, clipped an output on the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Saturation {
    /// Clipped at the lower limit.
    Lower,
    /// Within limits.
    #[default]
    None,
    /// Clipped at the upper limit.
    Upper,
}

impl Saturation {
    /// Numeric code recorded in log snapshots: -1, 0, or 1.
    pub fn code(self) -> i8 {
        match self {
            Saturation::Lower => -1,
            Saturation::None => 0,
            Saturation::Upper => 1,
        }
    }

    /// Clamps `value` into `[min, max]` and reports which limit was hit.
    ///
    /// Touching a limit counts as saturated.
    pub fn clip<T: Number>(value: T, min: T, max: T) -> (T, Self) {
        if value <= min {
            (min, Saturation::Lower)
        } else if value >= max {
            (max, Saturation::Upper)
        } else {
            (value, Saturation::None)
        }
    }
}
