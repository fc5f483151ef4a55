// src/system.rs

//! # Block-Diagram Control Systems
//!
//! A `ControlSystem` is an ordered list of blocks that read and write `f32`
//! signals on a shared `SignalBus`. Signal names are resolved to bus indices
//! once, when the system is built; running a frame touches indices only.
//!
//! Every block kind is a variant of `ControllerKind` and runs through one
//! `step` function, with the global `CtrlMode` passed in each frame.
//!
//! ```
//! use free_flight_allocation::config::BlockConfig;
//! use free_flight_allocation::{ControlSystem, CtrlMode, SignalBus};
//!
//! let mut bus = SignalBus::new();
//! let blocks = [
//!     BlockConfig::Constant { output: "trim".into(), value: 0.1 },
//!     BlockConfig::Sum {
//!         inputs: vec!["stick".into(), "trim".into()],
//!         output: "cmd".into(),
//!         limits: Some([-1.0, 1.0]),
//!     },
//! ];
//! let mut system = ControlSystem::with_config(&blocks, &mut bus).unwrap();
//!
//! let stick = bus.id("stick").unwrap();
//! bus.set(stick, 0.5);
//! system.run(&mut bus, CtrlMode::Engage, 0.02);
//! assert!((bus.value("cmd").unwrap() - 0.6).abs() < 1e-6);
//! ```

use crate::config::{matrix, BlockConfig};
use crate::error::ConfigError;
use crate::{CtrlMode, PidFunction, Saturation};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use log::info;
use nalgebra::{DMatrix, DVector};

/// Index of a signal on a `SignalBus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(usize);

/// Named `f32` signals stored in a flat array.
#[derive(Debug, Clone, Default)]
pub struct SignalBus {
    names: Vec<String>,
    values: Vec<f32>,
}

impl SignalBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `name`, adding a zeroed signal if it is new.
    pub fn register(&mut self, name: &str) -> SignalId {
        match self.id(name) {
            Some(id) => id,
            None => {
                self.names.push(name.into());
                self.values.push(0.0);
                SignalId(self.values.len() - 1)
            }
        }
    }

    /// Looks a signal up by name.
    pub fn id(&self, name: &str) -> Option<SignalId> {
        self.names.iter().position(|n| n == name).map(SignalId)
    }

    /// Signal value.
    ///
    /// # Panics
    ///
    /// Panics if `id` was issued by a different bus with more signals.
    pub fn get(&self, id: SignalId) -> f32 {
        self.values[id.0]
    }

    /// Sets a signal value.
    ///
    /// # Panics
    ///
    /// Panics if `id` was issued by a different bus with more signals.
    pub fn set(&mut self, id: SignalId, value: f32) {
        self.values[id.0] = value;
    }

    /// Signal value by name.
    pub fn value(&self, name: &str) -> Option<f32> {
        self.id(name).map(|id| self.get(id))
    }

    /// Number of registered signals.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no signal is registered.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Output limits of a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Lower limit.
    pub min: f32,
    /// Upper limit.
    pub max: f32,
}

impl Limits {
    fn from_config(
        what: &'static str,
        limits: Option<[f32; 2]>,
    ) -> Result<Option<Self>, ConfigError> {
        match limits {
            None => Ok(None),
            Some([min, max]) if !(min.is_finite() && max.is_finite()) => {
                Err(ConfigError::NonFinite(what))
            }
            Some([min, max]) if max < min => Err(ConfigError::InvalidLimits { what, index: 0 }),
            Some([min, max]) => Ok(Some(Self { min, max })),
        }
    }

    fn apply(limits: Option<Self>, value: f32) -> (f32, Saturation) {
        match limits {
            Some(limits) => Saturation::clip(value, limits.min, limits.max),
            None => (value, Saturation::None),
        }
    }
}

/// Discrete state-space block, `y = C x + D u` then `x <- A x + B u`.
pub struct StateSpace {
    inputs: Vec<SignalId>,
    outputs: Vec<SignalId>,
    a: DMatrix<f32>,
    b: DMatrix<f32>,
    c: DMatrix<f32>,
    d: DMatrix<f32>,
    limits: Option<Limits>,
    x: DVector<f32>,
    x_next: DVector<f32>,
    u: DVector<f32>,
    y: DVector<f32>,
    saturation: Vec<Saturation>,
}

impl StateSpace {
    fn step(&mut self, bus: &mut SignalBus, mode: CtrlMode) {
        match mode {
            CtrlMode::Standby => return,
            CtrlMode::Reset => {
                self.x.fill(0.0);
                self.y.fill(0.0);
                self.saturation.fill(Saturation::None);
                for (id, y) in self.outputs.iter().zip(self.y.iter()) {
                    bus.set(*id, *y);
                }
                return;
            }
            CtrlMode::Hold | CtrlMode::Init | CtrlMode::Engage => {}
        }

        for (u, id) in self.u.iter_mut().zip(&self.inputs) {
            *u = bus.get(*id);
        }
        self.y.gemv(1.0, &self.c, &self.x, 0.0);
        self.y.gemv(1.0, &self.d, &self.u, 1.0);
        for i in 0..self.y.len() {
            let (value, flag) = Limits::apply(self.limits, self.y[i]);
            self.y[i] = value;
            self.saturation[i] = flag;
            bus.set(self.outputs[i], value);
        }

        if mode == CtrlMode::Engage {
            self.x_next.gemv(1.0, &self.a, &self.x, 0.0);
            self.x_next.gemv(1.0, &self.b, &self.u, 1.0);
            self.x.copy_from(&self.x_next);
        }
    }

    /// State vector.
    pub fn state(&self) -> &[f32] {
        self.x.as_slice()
    }
}

/// A block and its resolved signals.
pub enum ControllerKind {
    /// Writes a fixed value.
    Constant {
        /// Output signal.
        output: SignalId,
        /// Value.
        value: f32,
    },
    /// Scales one signal.
    Gain {
        /// Input signal.
        input: SignalId,
        /// Output signal.
        output: SignalId,
        /// Gain.
        gain: f32,
        /// Output limits.
        limits: Option<Limits>,
        /// Saturation of the last output.
        saturation: Saturation,
    },
    /// Adds signals.
    Sum {
        /// Input signals.
        inputs: Vec<SignalId>,
        /// Output signal.
        output: SignalId,
        /// Output limits.
        limits: Option<Limits>,
        /// Saturation of the last output.
        saturation: Saturation,
    },
    /// PID with a finite-difference derivative.
    Pid2 {
        /// Reference signal.
        reference: SignalId,
        /// Measured signal.
        measurement: SignalId,
        /// Output signal.
        output: SignalId,
        /// The loop.
        pid: PidFunction<f32>,
    },
    /// PI with a damper on a measured rate.
    PiDamp {
        /// Reference signal.
        reference: SignalId,
        /// Measured signal.
        measurement: SignalId,
        /// Measured rate.
        rate: SignalId,
        /// Output signal.
        output: SignalId,
        /// The loop.
        pid: PidFunction<f32>,
    },
    /// Discrete state-space system.
    StateSpace(Box<StateSpace>),
}

impl ControllerKind {
    /// Resolves the signals of a block, registering any new ones on `bus`.
    pub fn with_config(config: &BlockConfig, bus: &mut SignalBus) -> Result<Self, ConfigError> {
        let block = match config {
            BlockConfig::Constant { output, value } => {
                if !value.is_finite() {
                    return Err(ConfigError::NonFinite("constant block"));
                }
                ControllerKind::Constant {
                    output: bus.register(output),
                    value: *value,
                }
            }
            BlockConfig::Gain {
                input,
                output,
                gain,
                limits,
            } => {
                if !gain.is_finite() {
                    return Err(ConfigError::NonFinite("gain block"));
                }
                ControllerKind::Gain {
                    input: bus.register(input),
                    output: bus.register(output),
                    gain: *gain,
                    limits: Limits::from_config("gain block", *limits)?,
                    saturation: Saturation::None,
                }
            }
            BlockConfig::Sum {
                inputs,
                output,
                limits,
            } => {
                if inputs.is_empty() {
                    return Err(ConfigError::Empty("sum block inputs"));
                }
                ControllerKind::Sum {
                    inputs: inputs.iter().map(|name| bus.register(name)).collect(),
                    output: bus.register(output),
                    limits: Limits::from_config("sum block", *limits)?,
                    saturation: Saturation::None,
                }
            }
            BlockConfig::Pid2 {
                reference,
                measurement,
                output,
                pid,
            } => ControllerKind::Pid2 {
                reference: bus.register(reference),
                measurement: bus.register(measurement),
                output: bus.register(output),
                pid: PidFunction::with_config(*pid)?,
            },
            BlockConfig::PiDamp {
                reference,
                measurement,
                rate,
                output,
                pid,
            } => ControllerKind::PiDamp {
                reference: bus.register(reference),
                measurement: bus.register(measurement),
                rate: bus.register(rate),
                output: bus.register(output),
                pid: PidFunction::with_config(*pid)?,
            },
            BlockConfig::StateSpace {
                inputs,
                outputs,
                a,
                b,
                c,
                d,
                limits,
            } => {
                let block = state_space(inputs, outputs, a, b, c, d, *limits, bus)?;
                ControllerKind::StateSpace(Box::new(block))
            }
        };
        Ok(block)
    }

    /// Runs the block for one frame.
    pub fn step(&mut self, bus: &mut SignalBus, mode: CtrlMode, dt: f32) {
        match self {
            ControllerKind::Constant { output, value } => bus.set(*output, *value),
            ControllerKind::Gain {
                input,
                output,
                gain,
                limits,
                saturation,
            } => {
                let (value, flag) = Limits::apply(*limits, bus.get(*input) * *gain);
                *saturation = flag;
                bus.set(*output, value);
            }
            ControllerKind::Sum {
                inputs,
                output,
                limits,
                saturation,
            } => {
                let sum: f32 = inputs.iter().map(|id| bus.get(*id)).sum();
                let (value, flag) = Limits::apply(*limits, sum);
                *saturation = flag;
                bus.set(*output, value);
            }
            ControllerKind::Pid2 {
                reference,
                measurement,
                output,
                pid,
            } => {
                let value = pid.step(bus.get(*reference), bus.get(*measurement), None, dt, mode);
                bus.set(*output, value);
            }
            ControllerKind::PiDamp {
                reference,
                measurement,
                rate,
                output,
                pid,
            } => {
                let value = pid.step(
                    bus.get(*reference),
                    bus.get(*measurement),
                    Some(bus.get(*rate)),
                    dt,
                    mode,
                );
                bus.set(*output, value);
            }
            ControllerKind::StateSpace(block) => block.step(bus, mode),
        }
    }

    /// Saturation of the block's first output.
    pub fn saturation(&self) -> Saturation {
        match self {
            ControllerKind::Constant { .. } => Saturation::None,
            ControllerKind::Gain { saturation, .. } | ControllerKind::Sum { saturation, .. } => {
                *saturation
            }
            ControllerKind::Pid2 { pid, .. } | ControllerKind::PiDamp { pid, .. } => {
                pid.saturation()
            }
            ControllerKind::StateSpace(block) => {
                block.saturation.first().copied().unwrap_or_default()
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn state_space(
    inputs: &[String],
    outputs: &[String],
    a: &[Vec<f32>],
    b: &[Vec<f32>],
    c: &[Vec<f32>],
    d: &[Vec<f32>],
    limits: Option<[f32; 2]>,
    bus: &mut SignalBus,
) -> Result<StateSpace, ConfigError> {
    let (m, p) = (inputs.len(), outputs.len());
    if p == 0 {
        return Err(ConfigError::Empty("state-space outputs"));
    }
    let a = matrix("state-space a", a)?;
    let n = a.nrows();
    // A system without states may leave a, b, and c empty.
    let b = if n == 0 {
        DMatrix::zeros(0, m)
    } else {
        matrix("state-space b", b)?
    };
    let c = if n == 0 {
        DMatrix::zeros(p, 0)
    } else {
        matrix("state-space c", c)?
    };
    let d = matrix("state-space d", d)?;

    let shapes = [
        ("state-space a", a.shape(), (n, n)),
        ("state-space b", b.shape(), (n, m)),
        ("state-space c", c.shape(), (p, n)),
        ("state-space d", d.shape(), (p, m)),
    ];
    for (what, found, expected) in shapes {
        if found.0 != expected.0 {
            return Err(ConfigError::DimensionMismatch {
                what,
                expected: expected.0,
                found: found.0,
            });
        }
        if found.1 != expected.1 {
            return Err(ConfigError::DimensionMismatch {
                what,
                expected: expected.1,
                found: found.1,
            });
        }
    }
    let matrices = [&a, &b, &c, &d];
    if !matrices.iter().all(|m| m.iter().all(|v| v.is_finite())) {
        return Err(ConfigError::NonFinite("state-space matrices"));
    }

    Ok(StateSpace {
        inputs: inputs.iter().map(|name| bus.register(name)).collect(),
        outputs: outputs.iter().map(|name| bus.register(name)).collect(),
        limits: Limits::from_config("state-space block", limits)?,
        x: DVector::zeros(n),
        x_next: DVector::zeros(n),
        u: DVector::zeros(m),
        y: DVector::zeros(p),
        saturation: vec![Saturation::None; p],
        a,
        b,
        c,
        d,
    })
}

/// Ordered blocks sharing one signal bus.
pub struct ControlSystem {
    blocks: Vec<ControllerKind>,
}

impl ControlSystem {
    /// Builds every block in order, registering their signals on `bus`.
    pub fn with_config(blocks: &[BlockConfig], bus: &mut SignalBus) -> Result<Self, ConfigError> {
        let blocks = blocks
            .iter()
            .map(|block| ControllerKind::with_config(block, bus))
            .collect::<Result<Vec<_>, _>>()?;
        info!("control system configured with {} blocks", blocks.len());
        Ok(Self { blocks })
    }

    /// Runs every block once, in order.
    pub fn run(&mut self, bus: &mut SignalBus, mode: CtrlMode, dt: f32) {
        for block in self.blocks.iter_mut() {
            block.step(bus, mode, dt);
        }
    }

    /// The blocks, in run order.
    pub fn blocks(&self) -> &[ControllerKind] {
        &self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::PidConfig;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| String::from(*name)).collect()
    }

    #[test]
    fn test_signal_bus_registry() {
        let mut bus = SignalBus::new();
        assert!(bus.is_empty());
        let roll = bus.register("roll");
        let pitch = bus.register("pitch");
        assert_eq!(bus.register("roll"), roll);
        assert_ne!(roll, pitch);
        assert_eq!(bus.len(), 2);

        bus.set(pitch, 0.25);
        assert_eq!(bus.value("pitch"), Some(0.25));
        assert_eq!(bus.value("yaw"), None);
    }

    #[test]
    #[should_panic]
    fn test_signal_bus_foreign_id() {
        let mut other = SignalBus::new();
        other.register("a");
        let id = other.register("b");
        SignalBus::new().get(id);
    }

    /// Blocks run in order, so a later block sees an earlier output in the
    /// same frame.
    #[test]
    fn test_system_gain_and_sum() {
        let mut bus = SignalBus::new();
        let blocks = [
            BlockConfig::Gain {
                input: "stick".into(),
                output: "scaled".into(),
                gain: 2.0,
                limits: Some([-1.0, 1.0]),
            },
            BlockConfig::Sum {
                inputs: names(&["scaled", "trim"]),
                output: "cmd".into(),
                limits: None,
            },
        ];
        let mut system = ControlSystem::with_config(&blocks, &mut bus).unwrap();
        let stick = bus.id("stick").unwrap();
        let trim = bus.id("trim").unwrap();

        bus.set(stick, 0.2);
        bus.set(trim, 0.1);
        system.run(&mut bus, CtrlMode::Engage, 0.02);
        assert!(value_close(0.5, bus.value("cmd").unwrap()));
        assert_eq!(system.blocks()[0].saturation(), Saturation::None);

        bus.set(stick, 3.0);
        system.run(&mut bus, CtrlMode::Engage, 0.02);
        assert!(value_close(1.1, bus.value("cmd").unwrap()));
        assert_eq!(system.blocks()[0].saturation(), Saturation::Upper);
    }

    #[test]
    fn test_system_rejects_bad_blocks() {
        let mut bus = SignalBus::new();
        let blocks = [BlockConfig::Gain {
            input: "a".into(),
            output: "b".into(),
            gain: 1.0,
            limits: Some([1.0, -1.0]),
        }];
        assert!(matches!(
            ControlSystem::with_config(&blocks, &mut bus),
            Err(ConfigError::InvalidLimits { .. })
        ));

        let blocks = [BlockConfig::StateSpace {
            inputs: names(&["u"]),
            outputs: names(&["y"]),
            a: vec![vec![1.0]],
            b: vec![vec![1.0, 0.0]],
            c: vec![vec![1.0]],
            d: vec![vec![0.0]],
            limits: None,
        }];
        assert_eq!(
            ControlSystem::with_config(&blocks, &mut bus).err(),
            Some(ConfigError::DimensionMismatch {
                what: "state-space b",
                expected: 1,
                found: 2
            })
        );
    }

    /// A discrete integrator: y = x, x <- x + dt*u.
    #[test]
    fn test_system_state_space_modes() {
        let mut bus = SignalBus::new();
        let blocks = [BlockConfig::StateSpace {
            inputs: names(&["u"]),
            outputs: names(&["y"]),
            a: vec![vec![1.0]],
            b: vec![vec![0.1]],
            c: vec![vec![1.0]],
            d: vec![vec![0.0]],
            limits: Some([-0.25, 0.25]),
        }];
        let mut system = ControlSystem::with_config(&blocks, &mut bus).unwrap();
        let u = bus.id("u").unwrap();
        bus.set(u, 1.0);

        for _ in 0..2 {
            system.run(&mut bus, CtrlMode::Engage, 0.1);
        }
        assert!(value_close(0.1, bus.value("y").unwrap()));

        // Hold computes the output but keeps the state.
        system.run(&mut bus, CtrlMode::Hold, 0.1);
        system.run(&mut bus, CtrlMode::Hold, 0.1);
        assert!(value_close(0.2, bus.value("y").unwrap()));

        for _ in 0..5 {
            system.run(&mut bus, CtrlMode::Engage, 0.1);
        }
        assert!(value_close(0.25, bus.value("y").unwrap()));
        assert_eq!(system.blocks()[0].saturation(), Saturation::Upper);

        system.run(&mut bus, CtrlMode::Reset, 0.1);
        assert!(value_close(0.0, bus.value("y").unwrap()));
        if let ControllerKind::StateSpace(block) = &system.blocks()[0] {
            assert!(slice_close(&[0.0], block.state()));
        }
    }

    /// A feedthrough-only system needs no state matrices.
    #[test]
    fn test_system_state_space_feedthrough() {
        let mut bus = SignalBus::new();
        let blocks = [BlockConfig::StateSpace {
            inputs: names(&["p", "q"]),
            outputs: names(&["mix"]),
            a: vec![],
            b: vec![],
            c: vec![],
            d: vec![vec![1.0, -1.0]],
            limits: None,
        }];
        let mut system = ControlSystem::with_config(&blocks, &mut bus).unwrap();
        let p = bus.id("p").unwrap();
        let q = bus.id("q").unwrap();
        bus.set(p, 0.75);
        bus.set(q, 0.25);
        system.run(&mut bus, CtrlMode::Init, 0.02);
        assert!(value_close(0.5, bus.value("mix").unwrap()));
    }

    /// PID blocks follow the global mode like a standalone loop.
    #[test]
    fn test_system_pid_blocks() {
        let mut bus = SignalBus::new();
        let pid = PidConfig {
            kp: 2.0,
            ki: 0.0,
            kd: 0.5,
            ..PidConfig::default()
        };
        let blocks = [
            BlockConfig::Constant {
                output: "ref".into(),
                value: 1.0,
            },
            BlockConfig::Pid2 {
                reference: "ref".into(),
                measurement: "meas".into(),
                output: "pid2".into(),
                pid: PidConfig { kd: 0.0, ..pid },
            },
            BlockConfig::PiDamp {
                reference: "ref".into(),
                measurement: "meas".into(),
                rate: "rate".into(),
                output: "pidamp".into(),
                pid,
            },
        ];
        let mut system = ControlSystem::with_config(&blocks, &mut bus).unwrap();
        let rate = bus.id("rate").unwrap();
        bus.set(rate, 0.4);

        system.run(&mut bus, CtrlMode::Standby, 0.02);
        assert!(value_close(0.0, bus.value("pid2").unwrap()));

        system.run(&mut bus, CtrlMode::Engage, 0.02);
        assert!(value_close(2.0, bus.value("pid2").unwrap()));
        assert!(value_close(1.8, bus.value("pidamp").unwrap()));

        system.run(&mut bus, CtrlMode::Reset, 0.02);
        assert!(value_close(0.0, bus.value("pidamp").unwrap()));
    }
}
