// src/frame.rs

//! # Per-Frame Control Core
//!
//! `ControlCore` runs one control frame end to end: the sequencer reads the
//! pilot switches and picks the global mode, both controller banks run with
//! that mode, and the selected commands are distributed to the effectors.
//!
//! The leading bank axes are the allocation objective. Axes past the
//! objective count, such as throttle, skip the allocator and are appended to
//! the effector commands unchanged.
//!
//! The core runs a single research bank. The control groups chosen by the
//! sequencer are reported in `SequencerOut` for the caller to act on, and
//! block-diagram controllers from `system` are a standalone component that
//! the caller runs on its own signal bus.

use crate::bank::FrameClock;
use crate::config::{AxisSource, CoreConfig, Source};
use crate::error::ConfigError;
use crate::sequencer::{ModeSequencer, SequencerLog, SequencerOut};
use crate::{AllocLog, AllocationDef, Allocator, BankLog, ControllerBank};
use alloc::vec;
use alloc::vec::Vec;
use log::info;

/// Sensor values the core reads each frame.
pub trait Measurements {
    /// Sample time in microseconds.
    fn time_us(&self) -> u64;
    /// Body-axis rates, roll, pitch, yaw, in rad/s.
    fn body_rate(&self) -> [f32; 3];
    /// Euler attitude, roll, pitch, yaw, in rad.
    fn attitude(&self) -> [f32; 3];
    /// Airspeed in m/s.
    fn airspeed(&self) -> f32;
    /// Normalized pilot channels.
    fn channels(&self) -> &[f32];
}

impl Source {
    fn read<M: Measurements + ?Sized>(self, sensors: &M) -> f32 {
        match self {
            Source::None => 0.0,
            Source::BodyRate(axis) => sensors.body_rate()[axis],
            Source::Attitude(axis) => sensors.attitude()[axis],
            Source::Airspeed => sensors.airspeed(),
        }
    }

    fn check(self) -> Result<(), ConfigError> {
        match self {
            Source::BodyRate(axis) | Source::Attitude(axis) if 3 <= axis => {
                Err(ConfigError::TooMany {
                    what: "measurement source axis",
                    max: 2,
                    found: axis,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Snapshot of the whole core for the data log.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoreLog {
    /// Sequencer state.
    pub sequencer: SequencerLog,
    /// Both controller banks.
    pub bank: BankLog,
    /// Allocator.
    pub allocation: AllocLog,
}

/// Sequencer, controller banks, and allocator, run in that order.
pub struct ControlCore {
    clock: FrameClock,
    sequencer: ModeSequencer,
    bank: ControllerBank,
    allocator: Allocator,
    sources: Vec<AxisSource>,
    meas: Vec<f32>,
    dmeas: Vec<f32>,
    output: Vec<f32>,
}

impl ControlCore {
    /// Builds every component and checks that their sizes fit together.
    pub fn with_config(config: &CoreConfig) -> Result<Self, ConfigError> {
        let sequencer = ModeSequencer::with_config(&config.sequencer)?;
        let bank = ControllerBank::with_config(&config.bank)?;
        let allocator = Allocator::new(AllocationDef::try_from(config.allocation.clone())?)?;

        let axes = bank.axes();
        if config.sources.len() != axes {
            return Err(ConfigError::DimensionMismatch {
                what: "measurement sources",
                expected: axes,
                found: config.sources.len(),
            });
        }
        for source in &config.sources {
            source.measurement.check()?;
            source.derivative.check()?;
        }
        let objectives = allocator.def().objectives();
        if axes < objectives {
            return Err(ConfigError::TooMany {
                what: "allocation objectives",
                max: axes,
                found: objectives,
            });
        }

        let outputs = allocator.def().effectors() + axes - objectives;
        info!(
            "control core configured: {} axes, {} objectives, {} outputs",
            axes, objectives, outputs
        );
        Ok(Self {
            clock: FrameClock::new(config.bank.default_dt),
            sequencer,
            bank,
            allocator,
            sources: config.sources.clone(),
            meas: vec![0.0; axes],
            dmeas: vec![0.0; axes],
            output: vec![0.0; outputs],
        })
    }

    /// Runs one frame and returns the effector commands followed by the
    /// pass-through axes.
    ///
    /// `refs` holds one reference per bank axis; missing entries read as zero.
    pub fn step<M: Measurements + ?Sized>(&mut self, sensors: &M, refs: &[f32]) -> &[f32] {
        let time_us = sensors.time_us();
        let dt = self.clock.tick(time_us);
        let out = self.sequencer.update(sensors.channels(), dt);
        self.bank.set_mode(out.ctrl_mode);

        for (i, source) in self.sources.iter().enumerate() {
            self.meas[i] = source.measurement.read(sensors);
            self.dmeas[i] = source.derivative.read(sensors);
        }
        self.bank.compute_baseline(refs, time_us);
        self.bank.compute_research(refs, &self.meas, &self.dmeas, time_us);
        let commands = self.bank.select_output(out.ctrl_mode);

        let objectives = self.allocator.def().objectives();
        let effectors = self.allocator.solve(&commands[..objectives]);
        let (allocated, passthrough) = self.output.split_at_mut(effectors.len());
        allocated.copy_from_slice(effectors);
        passthrough.copy_from_slice(&commands[objectives..]);
        &self.output
    }

    /// Output of the last frame.
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// Sequencer output of the last frame.
    pub fn sequencer_out(&self) -> SequencerOut {
        self.sequencer.out()
    }

    /// Snapshot for the data log.
    pub fn log(&self) -> CoreLog {
        CoreLog {
            sequencer: self.sequencer.log(),
            bank: self.bank.log(),
            allocation: self.allocator.log(),
        }
    }
}
