// src/pid/function.rs

//! # Mode-Aware PID Function
//!
//! `PidFunction` wraps a `piddiy` controller running the `compute_scaled`
//! callback and adds the run-mode state machine, output saturation, and
//! integrator back-solving that keep mode changes bump-free.
//!
//! ## Example
//!
//! ```
//! use free_flight_allocation::{CtrlMode, PidConfig, PidFunction};
//!
//! let mut config = PidConfig::<f32>::new();
//! config.kp = 0.1;
//! config.ki = 1.0;
//!
//! let mut pid = PidFunction::with_config(config).unwrap();
//! let command = pid.step(1.0, 0.0, None, 0.1, CtrlMode::Engage);
//! assert!(0.0 < command);
//! ```

use crate::error::ConfigError;
use crate::pid::{back_solve, compute_scaled, ScaledControlData};
use crate::{CtrlMode, Number, Saturation};
use log::debug;
use piddiy::PidController;
use serde::Deserialize;

/// Gains, setpoint weights, and output limits of a single loop.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(
    default,
    bound(deserialize = "T: Deserialize<'de>, PidConfig<T>: Default")
)]
pub struct PidConfig<T> {
    /// Proportional gain.
    pub kp: T,
    /// Integral gain.
    pub ki: T,
    /// Derivative gain.
    pub kd: T,
    /// Setpoint weight on the proportional error.
    pub b: T,
    /// Setpoint weight on the derivative error.
    pub c: T,
    /// Scale applied to the reference before any error is formed.
    pub ref_scale: T,
    /// Lower output limit.
    pub cmd_min: T,
    /// Upper output limit.
    pub cmd_max: T,
}

impl<T: Number> PidConfig<T> {
    /// Creates a new configuration with unit proportional gain, no integral
    /// or derivative action, unit weights, and a normalized `[-1, 1]` output
    /// range.
    pub fn new() -> Self {
        Self {
            kp: T::one(),
            ki: T::zero(),
            kd: T::zero(),
            b: T::one(),
            c: T::one(),
            ref_scale: T::one(),
            cmd_min: T::zero() - T::one(),
            cmd_max: T::one(),
        }
    }
}

/// Flight-software defaults: unit weights and a `[-1000, 1000]` output range.
impl Default for PidConfig<f32> {
    fn default() -> Self {
        Self {
            cmd_min: -1000.0,
            cmd_max: 1000.0,
            ..Self::new()
        }
    }
}

/// Snapshot of a loop for the data log.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidLog<T> {
    /// Mode the loop is in after its last step.
    pub mode: CtrlMode,
    /// Scaled reference of the last step.
    pub reference: T,
    /// Measurement of the last step.
    pub measurement: T,
    /// Integrator state.
    pub integrator: T,
    /// Last output command.
    pub command: T,
    /// Saturation flag of the last output.
    pub saturation: Saturation,
}

/// A scalar control loop with Reset/Standby/Hold/Init/Engage behavior.
pub struct PidFunction<T: Number> {
    pid: PidController<T, ScaledControlData<T>>,
    b: T,
    c: T,
    ref_scale: T,
    cmd_min: T,
    cmd_max: T,
    mode: CtrlMode,
    d_err_prev: T,
    external_command: Option<T>,
    measurement: T,
    command: T,
    saturation: Saturation,
}

impl<T: Number> PidFunction<T> {
    /// Builds a loop in `Standby` with zeroed state.
    pub fn with_config(config: PidConfig<T>) -> Result<Self, ConfigError> {
        let values = [
            config.kp,
            config.ki,
            config.kd,
            config.b,
            config.c,
            config.ref_scale,
            config.cmd_min,
            config.cmd_max,
        ];
        if !values.iter().all(|value| value.finite()) {
            return Err(ConfigError::NonFinite("pid config"));
        }
        if config.cmd_max < config.cmd_min {
            return Err(ConfigError::InvalidLimits {
                what: "pid command",
                index: 0,
            });
        }

        let mut pid = PidController::new();
        pid.compute_fn(compute_scaled)
            .set_point(T::zero())
            .kp(config.kp)
            .ki(config.ki)
            .kd(config.kd);

        Ok(Self {
            pid,
            b: config.b,
            c: config.c,
            ref_scale: config.ref_scale,
            cmd_min: config.cmd_min,
            cmd_max: config.cmd_max,
            mode: CtrlMode::Standby,
            d_err_prev: T::zero(),
            external_command: None,
            measurement: T::zero(),
            command: T::zero(),
            saturation: Saturation::None,
        })
    }

    /// Current run mode.
    pub fn mode(&self) -> CtrlMode {
        self.mode
    }

    /// Sets the mode used by the next `run`.
    pub fn set_mode(&mut self, mode: CtrlMode) {
        if mode != self.mode {
            debug!("pid mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
    }

    /// Command the next `Init` step initializes to. Consumed by that step;
    /// without it `Init` holds the last output.
    pub fn set_external_command(&mut self, command: T) {
        self.external_command = Some(command);
    }

    /// Last output command.
    pub fn command(&self) -> T {
        self.command
    }

    /// Integrator state.
    pub fn integrator(&self) -> T {
        self.pid.integral
    }

    /// Saturation flag of the last output.
    pub fn saturation(&self) -> Saturation {
        self.saturation
    }

    /// Sets the mode and runs one frame.
    ///
    /// `derivative` selects the PI+damper form: when present the derivative
    /// term is the negated measured rate instead of a finite difference.
    pub fn step(
        &mut self,
        reference: T,
        measurement: T,
        derivative: Option<T>,
        dt: T,
        mode: CtrlMode,
    ) -> T {
        self.set_mode(mode);
        self.run(reference, measurement, derivative, dt)
    }

    /// Runs one frame in the current mode and returns the output command.
    pub fn run(&mut self, reference: T, measurement: T, derivative: Option<T>, dt: T) -> T {
        match self.mode {
            CtrlMode::Reset => {
                self.pid.integral = T::zero();
                self.pid.error = T::zero();
                self.d_err_prev = T::zero();
                self.external_command = None;
                self.command = T::zero();
                self.saturation = Saturation::None;
                self.set_mode(CtrlMode::Standby);
                return self.command;
            }
            CtrlMode::Standby => return self.command,
            CtrlMode::Hold | CtrlMode::Init | CtrlMode::Engage => {}
        }

        let reference = self.ref_scale * reference;
        self.pid.set_point(reference);
        let data = ScaledControlData {
            measurement,
            rate: derivative,
            d_err_prev: self.d_err_prev,
            b: self.b,
            c: self.c,
            dt,
            mode: self.mode,
            target: self.external_command.take().unwrap_or(self.command),
        };
        let errors = data.errors(reference);

        let (command, saturation) =
            Saturation::clip(self.pid.compute(data), self.cmd_min, self.cmd_max);
        if saturation != Saturation::None {
            self.pid.integral = back_solve(
                self.pid.kp,
                self.pid.ki,
                self.pid.kd,
                command,
                errors.p_err,
                errors.d_state,
            );
        }

        self.d_err_prev = errors.d_err;
        self.measurement = measurement;
        self.command = command;
        self.saturation = saturation;
        command
    }

    /// Snapshot for the data log.
    pub fn log(&self) -> PidLog<T> {
        PidLog {
            mode: self.mode,
            reference: self.pid.set_point,
            measurement: self.measurement,
            integrator: self.pid.integral,
            command: self.command,
            saturation: self.saturation,
        }
    }
}
