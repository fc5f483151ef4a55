// src/config.rs

//! # Configuration
//!
//! Deserializable descriptions of every component. A loader fills these
//! structs from whatever format it reads; the components validate them when
//! they are built, so a bad value surfaces as a `ConfigError` before the
//! first frame.
//!
//! Example, from JSON text:
//!
//! ```
//! use free_flight_allocation::config::SwitchConfig;
//!
//! let switch: SwitchConfig = serde_json::from_str(r#"{ "channel": 4 }"#).unwrap();
//! assert_eq!(switch.channel, Some(4));
//! assert_eq!(switch.persistence, 5);
//! ```

use crate::allocation::{AllocMethod, AllocationDef};
use crate::error::ConfigError;
pub use crate::pid::PidConfig;
use alloc::string::String;
use alloc::vec::Vec;
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;

fn default_dt() -> f32 {
    0.02
}

/// One axis of a controller bank.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AxisConfig {
    /// Loop gains and limits.
    #[serde(flatten)]
    pub pid: PidConfig<f32>,
    /// Take the derivative term from a measured rate instead of a finite
    /// difference.
    #[serde(default)]
    pub damper: bool,
}

/// Baseline and research banks. Both must have the same number of axes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BankConfig {
    /// Baseline axes, in axis order.
    pub baseline: Vec<AxisConfig>,
    /// Research axes, in axis order.
    pub research: Vec<AxisConfig>,
    /// Time step used before two timestamps have been seen.
    #[serde(default = "default_dt")]
    pub default_dt: f32,
}

/// A weighting matrix, either as its diagonal or in full.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Weight {
    /// Diagonal entries.
    Diagonal(Vec<f32>),
    /// Full matrix, row-major.
    Full(Vec<Vec<f32>>),
}

pub(crate) fn matrix(what: &'static str, rows: &[Vec<f32>]) -> Result<DMatrix<f32>, ConfigError> {
    let cols = rows.first().map_or(0, Vec::len);
    if let Some(row) = rows.iter().find(|row| row.len() != cols) {
        return Err(ConfigError::DimensionMismatch {
            what,
            expected: cols,
            found: row.len(),
        });
    }
    Ok(DMatrix::from_row_iterator(
        rows.len(),
        cols,
        rows.iter().flatten().copied(),
    ))
}

fn weight(
    what: &'static str,
    weight: Option<&Weight>,
    size: usize,
) -> Result<DMatrix<f32>, ConfigError> {
    match weight {
        None => Ok(DMatrix::identity(size, size)),
        Some(Weight::Diagonal(diagonal)) => {
            let diagonal = DVector::from_column_slice(diagonal);
            Ok(DMatrix::from_diagonal(&diagonal))
        }
        Some(Weight::Full(rows)) => matrix(what, rows),
    }
}

/// Allocation problem in loader-friendly form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AllocConfig {
    /// Control effectiveness, one row per objective.
    pub cntrl_eff: Vec<Vec<f32>>,
    /// Lower effector limits.
    pub u_min: Vec<f32>,
    /// Upper effector limits.
    pub u_max: Vec<f32>,
    /// Preferred effector positions. Zero when omitted.
    #[serde(default)]
    pub u_pref: Option<Vec<f32>>,
    /// Objective weighting. Identity when omitted.
    #[serde(default)]
    pub wt_obj: Option<Weight>,
    /// Effector weighting. Identity when omitted.
    #[serde(default)]
    pub wt_eff: Option<Weight>,
    /// Solution method.
    #[serde(default)]
    pub method: AllocMethod,
}

impl TryFrom<AllocConfig> for AllocationDef {
    type Error = ConfigError;

    /// Builds the matrices. Sizes are checked against each other when the
    /// `Allocator` is built.
    fn try_from(config: AllocConfig) -> Result<Self, Self::Error> {
        let cntrl_eff = matrix("control effectiveness", &config.cntrl_eff)?;
        let (objectives, effectors) = cntrl_eff.shape();
        let u_pref = match config.u_pref {
            Some(u_pref) => DVector::from_vec(u_pref),
            None => DVector::zeros(effectors),
        };
        Ok(AllocationDef {
            u_min: DVector::from_vec(config.u_min),
            u_max: DVector::from_vec(config.u_max),
            u_pref,
            wt_obj: weight("wt_obj", config.wt_obj.as_ref(), objectives)?,
            wt_eff: weight("wt_eff", config.wt_eff.as_ref(), effectors)?,
            method: config.method,
            cntrl_eff,
        })
    }
}

/// A pilot switch on a normalized input channel.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Input channel. `None` leaves the switch permanently low.
    pub channel: Option<usize>,
    /// The switch reads high when `value * gain` exceeds this.
    pub threshold: f32,
    /// Scale applied to the channel, `-1` inverts the switch.
    pub gain: f32,
    /// Consecutive frames of disagreement needed to change state.
    pub persistence: u32,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            channel: None,
            threshold: 0.5,
            gain: 1.0,
            persistence: 5,
        }
    }
}

/// A test point, by group name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestPointConfig {
    /// Sensor-processing group name.
    pub sensor_processing: String,
    /// Control group name.
    pub control: String,
    /// Excitation group name.
    pub excitation: String,
}

/// Switches, group tables, and the ordered test-point table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SequencerConfig {
    /// Hands the aircraft to the flight computer.
    #[serde(default)]
    pub soc_engage: SwitchConfig,
    /// Selects the research group.
    #[serde(default)]
    pub research_select: SwitchConfig,
    /// Trigger advances the test point.
    #[serde(default)]
    pub test_increment: SwitchConfig,
    /// Trigger returns to the first test point.
    #[serde(default)]
    pub test_decrement: SwitchConfig,
    /// Acts on the test-select state.
    #[serde(default)]
    pub trigger: SwitchConfig,
    /// Names of the research sensor-processing groups.
    #[serde(default)]
    pub sensor_processing_groups: Vec<String>,
    /// Names of the research control groups.
    #[serde(default)]
    pub control_groups: Vec<String>,
    /// Names of the excitation groups.
    #[serde(default)]
    pub excitation_groups: Vec<String>,
    /// Ordered test points.
    pub test_points: Vec<TestPointConfig>,
}

fn default_gain() -> f32 {
    1.0
}

/// One block of a control system. Signals are named here and resolved to
/// bus indices when the system is built.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub enum BlockConfig {
    /// Writes a fixed value.
    Constant {
        /// Output signal.
        output: String,
        /// Value written every frame.
        value: f32,
    },
    /// Scales one signal.
    Gain {
        /// Input signal.
        input: String,
        /// Output signal.
        output: String,
        /// Gain applied to the input.
        #[serde(default = "default_gain")]
        gain: f32,
        /// Optional `[min, max]` output limits.
        #[serde(default)]
        limits: Option<[f32; 2]>,
    },
    /// Adds signals.
    Sum {
        /// Input signals.
        inputs: Vec<String>,
        /// Output signal.
        output: String,
        /// Optional `[min, max]` output limits.
        #[serde(default)]
        limits: Option<[f32; 2]>,
    },
    /// Two-degree-of-freedom PID on a finite-difference derivative.
    Pid2 {
        /// Reference signal.
        reference: String,
        /// Measured signal.
        measurement: String,
        /// Output signal.
        output: String,
        /// Loop gains and limits.
        #[serde(default)]
        pid: PidConfig<f32>,
    },
    /// PI with a damper on a measured rate.
    PiDamp {
        /// Reference signal.
        reference: String,
        /// Measured signal.
        measurement: String,
        /// Measured rate.
        rate: String,
        /// Output signal.
        output: String,
        /// Loop gains and limits.
        #[serde(default)]
        pid: PidConfig<f32>,
    },
    /// Discrete linear state-space system.
    StateSpace {
        /// Input signals.
        inputs: Vec<String>,
        /// Output signals.
        outputs: Vec<String>,
        /// State matrix, row-major.
        a: Vec<Vec<f32>>,
        /// Input matrix, row-major.
        b: Vec<Vec<f32>>,
        /// Output matrix, row-major.
        c: Vec<Vec<f32>>,
        /// Feedthrough matrix, row-major.
        d: Vec<Vec<f32>>,
        /// Optional `[min, max]` limits on every output.
        #[serde(default)]
        limits: Option<[f32; 2]>,
    },
}

/// A measured signal available from the sensor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Source {
    /// Not measured, reads as zero.
    #[default]
    None,
    /// Body-axis rate: 0 roll, 1 pitch, 2 yaw.
    BodyRate(usize),
    /// Euler attitude: 0 roll, 1 pitch, 2 yaw.
    Attitude(usize),
    /// Airspeed.
    Airspeed,
}

/// Measurement sources of one research axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct AxisSource {
    /// Controlled variable.
    pub measurement: Source,
    /// Rate fed to a damper axis.
    pub derivative: Source,
}

/// Everything one control frame needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CoreConfig {
    /// Mode sequencer.
    pub sequencer: SequencerConfig,
    /// Controller banks.
    pub bank: BankConfig,
    /// Measurement sources, one per bank axis.
    pub sources: Vec<AxisSource>,
    /// Allocation problem. Its objectives are the leading bank axes; the
    /// remaining axes pass straight through to the output.
    pub allocation: AllocConfig,
}
