// src/bank.rs

//! # Baseline and Research Controller Banks
//!
//! A `ControllerBank` holds one `PidFunction` per control axis for each of
//! two banks. The baseline bank is the safe, simple law; the research bank
//! is the law under test. The global mode fans out asymmetrically so the
//! bank that is not driving the aircraft always tracks the live output:
//!
//! | global mode                     | baseline | research    |
//! |---------------------------------|----------|-------------|
//! | Reset, Standby, Hold, Init      | Engage   | global mode |
//! | Engage                          | Init     | Engage      |

use crate::config::{AxisConfig, BankConfig};
use crate::error::ConfigError;
use crate::{CtrlMode, PidFunction};
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, info};

/// Largest number of axes a bank supports.
pub const MAX_AXES: usize = 6;

/// Derives the frame time step from microsecond timestamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    prev_us: Option<u64>,
    default_dt: f32,
}

impl FrameClock {
    /// Creates a clock that reports `default_dt` on its first tick.
    pub fn new(default_dt: f32) -> Self {
        Self {
            prev_us: None,
            default_dt,
        }
    }

    /// Seconds since the previous tick, never negative.
    pub fn tick(&mut self, time_us: u64) -> f32 {
        let dt = match self.prev_us {
            Some(prev_us) => time_us.saturating_sub(prev_us) as f32 * 1e-6,
            None => self.default_dt,
        };
        self.prev_us = Some(time_us);
        dt
    }
}

struct Axis {
    pid: PidFunction<f32>,
    damper: bool,
}

fn build_axes(configs: &[AxisConfig]) -> Result<Vec<Axis>, ConfigError> {
    configs
        .iter()
        .map(|config| {
            Ok(Axis {
                pid: PidFunction::with_config(config.pid)?,
                damper: config.damper,
            })
        })
        .collect()
}

/// Snapshot of both banks for the data log.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BankLog {
    /// Global mode last applied.
    pub mode: CtrlMode,
    /// Number of valid entries in each array.
    pub axes: usize,
    /// Baseline commands.
    pub baseline: [f32; MAX_AXES],
    /// Research commands.
    pub research: [f32; MAX_AXES],
    /// Selected output.
    pub output: [f32; MAX_AXES],
    /// Baseline integrator states.
    pub baseline_integrator: [f32; MAX_AXES],
    /// Research integrator states.
    pub research_integrator: [f32; MAX_AXES],
}

/// Baseline and research controllers for every control axis.
pub struct ControllerBank {
    mode: CtrlMode,
    baseline: Vec<Axis>,
    research: Vec<Axis>,
    baseline_clock: FrameClock,
    research_clock: FrameClock,
    baseline_cmd: Vec<f32>,
    research_cmd: Vec<f32>,
    output: Vec<f32>,
}

impl ControllerBank {
    /// Builds both banks in `Standby`.
    pub fn with_config(config: &BankConfig) -> Result<Self, ConfigError> {
        let axes = config.baseline.len();
        if axes == 0 {
            return Err(ConfigError::Empty("controller bank"));
        }
        if MAX_AXES < axes {
            return Err(ConfigError::TooMany {
                what: "controller bank axes",
                max: MAX_AXES,
                found: axes,
            });
        }
        if config.research.len() != axes {
            return Err(ConfigError::DimensionMismatch {
                what: "research bank",
                expected: axes,
                found: config.research.len(),
            });
        }
        if !(0.0 < config.default_dt && config.default_dt.is_finite()) {
            return Err(ConfigError::InvalidDt("bank default dt"));
        }

        let bank = Self {
            mode: CtrlMode::Standby,
            baseline: build_axes(&config.baseline)?,
            research: build_axes(&config.research)?,
            baseline_clock: FrameClock::new(config.default_dt),
            research_clock: FrameClock::new(config.default_dt),
            baseline_cmd: vec![0.0; axes],
            research_cmd: vec![0.0; axes],
            output: vec![0.0; axes],
        };
        info!("controller bank configured with {} axes", axes);
        Ok(bank)
    }

    /// Number of axes in each bank.
    pub fn axes(&self) -> usize {
        self.output.len()
    }

    /// Global mode last applied.
    pub fn mode(&self) -> CtrlMode {
        self.mode
    }

    /// Fans the global mode out to every axis.
    pub fn set_mode(&mut self, mode: CtrlMode) {
        if mode != self.mode {
            debug!("controller bank mode {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;

        let (baseline_mode, research_mode) = match mode {
            CtrlMode::Engage => (CtrlMode::Init, CtrlMode::Engage),
            other => (CtrlMode::Engage, other),
        };
        for axis in self.baseline.iter_mut() {
            axis.pid.set_mode(baseline_mode);
        }
        for axis in self.research.iter_mut() {
            axis.pid.set_mode(research_mode);
        }
    }

    /// Runs the baseline bank. Baseline axes see a zero measurement; in
    /// `Init` they track the last research command.
    pub fn compute_baseline(&mut self, refs: &[f32], time_us: u64) -> &[f32] {
        let dt = self.baseline_clock.tick(time_us);
        for (i, axis) in self.baseline.iter_mut().enumerate() {
            if axis.pid.mode() == CtrlMode::Init {
                axis.pid.set_external_command(self.research_cmd[i]);
            }
            let reference = refs.get(i).copied().unwrap_or(0.0);
            self.baseline_cmd[i] = axis.pid.run(reference, 0.0, None, dt);
        }
        &self.baseline_cmd
    }

    /// Runs the research bank. Axes configured as dampers take their
    /// derivative from `dmeas`; in `Init` every axis tracks the current
    /// baseline command.
    pub fn compute_research(
        &mut self,
        refs: &[f32],
        meas: &[f32],
        dmeas: &[f32],
        time_us: u64,
    ) -> &[f32] {
        let dt = self.research_clock.tick(time_us);
        for (i, axis) in self.research.iter_mut().enumerate() {
            if axis.pid.mode() == CtrlMode::Init {
                axis.pid.set_external_command(self.baseline_cmd[i]);
            }
            let reference = refs.get(i).copied().unwrap_or(0.0);
            let measurement = meas.get(i).copied().unwrap_or(0.0);
            let derivative = axis.damper.then(|| dmeas.get(i).copied().unwrap_or(0.0));
            self.research_cmd[i] = axis.pid.run(reference, measurement, derivative, dt);
        }
        &self.research_cmd
    }

    /// Research commands when `mode` is `Engage`, otherwise baseline.
    pub fn select_output(&mut self, mode: CtrlMode) -> &[f32] {
        let source = match mode {
            CtrlMode::Engage => &self.research_cmd,
            _ => &self.baseline_cmd,
        };
        self.output.copy_from_slice(source);
        &self.output
    }

    /// Snapshot for the data log.
    pub fn log(&self) -> BankLog {
        let mut log = BankLog {
            mode: self.mode,
            axes: self.axes(),
            ..BankLog::default()
        };
        for i in 0..self.axes() {
            log.baseline[i] = self.baseline_cmd[i];
            log.research[i] = self.research_cmd[i];
            log.output[i] = self.output[i];
            log.baseline_integrator[i] = self.baseline[i].pid.integrator();
            log.research_integrator[i] = self.research[i].pid.integrator();
        }
        log
    }
}
