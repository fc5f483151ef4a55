// src/pid/scaled.rs

//! # Reference-Scaled PID Control Module
//!
//! This module provides a compute function and control data structure to
//! perform two-degree-of-freedom PID calculations with setpoint weights on
//! the proportional and derivative paths. The derivative term comes either
//! from a backward difference of the weighted error or, for a PI+damper
//! loop, directly from a measured rate.
//!
//! The integrator value returned to the controller depends on the run mode:
//! frozen in `Hold`, back-solved in `Init`, advanced in `Engage`.

use crate::{CtrlMode, Number};
use piddiy::PidController;

/// Control data for the scaled PID compute callback.
///
/// The scaled reference is carried by the controller's set point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScaledControlData<T> {
    /// The measured value being controlled.
    pub measurement: T,
    /// Measured rate for a PI+damper loop. `None` selects the backward
    /// difference of the derivative error.
    pub rate: Option<T>,
    /// Derivative error from the previous frame.
    pub d_err_prev: T,
    /// Setpoint weight on the proportional path.
    pub b: T,
    /// Setpoint weight on the derivative path.
    pub c: T,
    /// The time delta since the last computation.
    pub dt: T,
    /// Run mode for this frame.
    pub mode: CtrlMode,
    /// Command the `Init` mode back-solves the integrator to.
    pub target: T,
}

/// Error terms of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledErrors<T> {
    /// Proportional error, `b*r - y`.
    pub p_err: T,
    /// Integral error, `r - y`.
    pub i_err: T,
    /// Derivative error, `c*r - y`.
    pub d_err: T,
    /// Derivative term fed to `Kd`.
    pub d_state: T,
}

impl<T: Number> ScaledControlData<T> {
    /// Computes the error terms against a scaled reference.
    ///
    /// With no measured rate and a non-positive `dt` the derivative term is
    /// zero.
    pub fn errors(&self, reference: T) -> ScaledErrors<T> {
        let p_err = self.b * reference - self.measurement;
        let i_err = reference - self.measurement;
        let d_err = self.c * reference - self.measurement;
        let d_state = match self.rate {
            Some(rate) => T::zero() - rate,
            None if T::zero() < self.dt => (d_err - self.d_err_prev) / self.dt,
            None => T::zero(),
        };

        ScaledErrors {
            p_err,
            i_err,
            d_err,
            d_state,
        }
    }
}

/// Integrator state that makes `kp*p_err + ki*state + kd*d_state == cmd`.
///
/// Returns zero when `ki` is zero.
pub fn back_solve<T: Number>(kp: T, ki: T, kd: T, cmd: T, p_err: T, d_state: T) -> T {
    if ki == T::zero() {
        T::zero()
    } else {
        (cmd - (kp * p_err + kd * d_state)) / ki
    }
}

/// Scaled PID compute callback.
pub fn compute_scaled<T: Number>(
    pid: &mut PidController<T, ScaledControlData<T>>,
    data: ScaledControlData<T>,
) -> (T, T, T) {
    let errors = data.errors(pid.set_point);
    let integral = match data.mode {
        CtrlMode::Init => back_solve(
            pid.kp,
            pid.ki,
            pid.kd,
            data.target,
            errors.p_err,
            errors.d_state,
        ),
        CtrlMode::Engage if pid.ki == T::zero() => T::zero(),
        CtrlMode::Engage if T::zero() < data.dt => pid.integral + errors.i_err * data.dt,
        _ => pid.integral,
    };

    (errors.p_err, integral, errors.d_state)
}
