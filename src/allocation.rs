// src/allocation.rs

//! # Control Allocation
//!
//! Maps an objective vector (desired moments or rates in the control axes)
//! onto a redundant set of effectors. The solve operator is factored once
//! when the allocator is built; a frame only performs matrix-vector products
//! into preallocated buffers, followed by position saturation.
//!
//! Three methods are available:
//!
//! * `Pseudo`: minimum-norm least squares, `u = pinv(B) b + u_pref`.
//! * `PseudoWeighted`: `u = inv(We) pinv(Wo B inv(We)) Wo b + u_pref`.
//! * `FixedPoint`: a projected fixed-point iteration on a regularized
//!   quadratic cost, which respects effector limits inside the iteration.
//!
//! In all cases `b = v - B u_pref` is the objective left after the preferred
//! effector positions are accounted for.

use crate::error::ConfigError;
use crate::Saturation;
use alloc::vec;
use alloc::vec::Vec;
use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;

/// Largest number of objectives an allocator supports.
pub const MAX_OBJECTIVES: usize = 5;

/// Largest number of effectors an allocator supports.
pub const MAX_EFFECTORS: usize = 16;

/// Allocation method.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub enum AllocMethod {
    /// Unweighted pseudo-inverse.
    Pseudo,
    /// Pseudo-inverse with objective and effector weighting.
    #[default]
    PseudoWeighted,
    /// Projected fixed-point iteration.
    FixedPoint {
        /// Effector regularization weight in `(0, 1)`.
        gamma: f32,
        /// Iterations per frame.
        iterations: u16,
    },
}

impl AllocMethod {
    /// Fixed-point iteration with the flight-software settings.
    pub fn fixed_point() -> Self {
        AllocMethod::FixedPoint {
            gamma: 0.001,
            iterations: 200,
        }
    }
}

/// A complete allocation problem.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationDef {
    /// Control effectiveness, objectives by effectors.
    pub cntrl_eff: DMatrix<f32>,
    /// Lower effector limits.
    pub u_min: DVector<f32>,
    /// Upper effector limits.
    pub u_max: DVector<f32>,
    /// Preferred effector positions.
    pub u_pref: DVector<f32>,
    /// Objective weighting, objectives by objectives.
    pub wt_obj: DMatrix<f32>,
    /// Effector weighting, effectors by effectors.
    pub wt_eff: DMatrix<f32>,
    /// Solution method.
    pub method: AllocMethod,
}

impl AllocationDef {
    /// Unweighted problem with `u_pref` at zero.
    pub fn new(cntrl_eff: DMatrix<f32>, u_min: DVector<f32>, u_max: DVector<f32>) -> Self {
        let (objectives, effectors) = cntrl_eff.shape();
        Self {
            u_pref: DVector::zeros(effectors),
            wt_obj: DMatrix::identity(objectives, objectives),
            wt_eff: DMatrix::identity(effectors, effectors),
            method: AllocMethod::default(),
            cntrl_eff,
            u_min,
            u_max,
        }
    }

    /// Number of objectives.
    pub fn objectives(&self) -> usize {
        self.cntrl_eff.nrows()
    }

    /// Number of effectors.
    pub fn effectors(&self) -> usize {
        self.cntrl_eff.ncols()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (objectives, effectors) = self.cntrl_eff.shape();
        if objectives == 0 || effectors == 0 {
            return Err(ConfigError::Empty("control effectiveness"));
        }
        if MAX_OBJECTIVES < objectives {
            return Err(ConfigError::TooMany {
                what: "objectives",
                max: MAX_OBJECTIVES,
                found: objectives,
            });
        }
        if MAX_EFFECTORS < effectors {
            return Err(ConfigError::TooMany {
                what: "effectors",
                max: MAX_EFFECTORS,
                found: effectors,
            });
        }

        let vectors = [
            ("u_min", &self.u_min),
            ("u_max", &self.u_max),
            ("u_pref", &self.u_pref),
        ];
        for (what, vector) in vectors {
            if vector.len() != effectors {
                return Err(ConfigError::DimensionMismatch {
                    what,
                    expected: effectors,
                    found: vector.len(),
                });
            }
        }
        let weights = [
            ("wt_obj", &self.wt_obj, objectives),
            ("wt_eff", &self.wt_eff, effectors),
        ];
        for (what, weight, size) in weights {
            for found in [weight.nrows(), weight.ncols()] {
                if found != size {
                    return Err(ConfigError::DimensionMismatch {
                        what,
                        expected: size,
                        found,
                    });
                }
            }
        }

        let entries = [
            ("control effectiveness", self.cntrl_eff.as_slice()),
            ("u_min", self.u_min.as_slice()),
            ("u_max", self.u_max.as_slice()),
            ("u_pref", self.u_pref.as_slice()),
            ("wt_obj", self.wt_obj.as_slice()),
            ("wt_eff", self.wt_eff.as_slice()),
        ];
        for (what, values) in entries {
            if !values.iter().all(|v| v.is_finite()) {
                return Err(ConfigError::NonFinite(what));
            }
        }
        if let Some(index) = (0..effectors).find(|&i| self.u_max[i] < self.u_min[i]) {
            return Err(ConfigError::InvalidLimits {
                what: "effector",
                index,
            });
        }
        if let AllocMethod::FixedPoint { gamma, iterations } = self.method {
            if !(0.0 < gamma && gamma < 1.0) || iterations == 0 {
                return Err(ConfigError::Solver(
                    "gamma must be in (0, 1) and iterations nonzero",
                ));
            }
        }
        Ok(())
    }
}

/// Minimum-norm least-squares inverse. Singular values below
/// `max(m, n) * eps * sigma_max` are treated as zero.
pub fn pseudo_inverse(matrix: &DMatrix<f32>) -> Result<DMatrix<f32>, ConfigError> {
    let (rows, cols) = matrix.shape();
    let svd = matrix
        .clone()
        .try_svd(true, true, f32::EPSILON, 0)
        .ok_or(ConfigError::Solver("SVD did not converge"))?;
    let threshold = rows.max(cols) as f32 * f32::EPSILON * svd.singular_values.max();
    svd.pseudo_inverse(threshold).map_err(ConfigError::Solver)
}

enum Solver {
    /// `x = operator * b`
    Direct { operator: DMatrix<f32> },
    /// `x <- sat(f_map * b - g * x)`
    FixedPoint {
        f_map: DMatrix<f32>,
        g: DMatrix<f32>,
        iterations: u16,
        f: DVector<f32>,
        work: DVector<f32>,
    },
}

fn build_solver(def: &AllocationDef) -> Result<Solver, ConfigError> {
    let b = &def.cntrl_eff;
    match def.method {
        AllocMethod::Pseudo => Ok(Solver::Direct {
            operator: pseudo_inverse(b)?,
        }),
        AllocMethod::PseudoWeighted => {
            let wt_eff_inv = def
                .wt_eff
                .clone()
                .try_inverse()
                .ok_or(ConfigError::SingularWeight("effector"))?;
            let weighted = &def.wt_obj * b * &wt_eff_inv;
            Ok(Solver::Direct {
                operator: wt_eff_inv * pseudo_inverse(&weighted)? * &def.wt_obj,
            })
        }
        AllocMethod::FixedPoint { gamma, iterations } => {
            let effectors = def.effectors();
            let bzt = b.transpose() * def.wt_obj.transpose() * &def.wt_obj;
            let h = (&bzt * b) * (1.0 - gamma) + def.wt_eff.transpose() * &def.wt_eff * gamma;
            let norm = h.norm();
            if !(0.0 < norm && norm.is_finite()) {
                return Err(ConfigError::Solver("fixed-point Hessian is degenerate"));
            }
            let w = 1.0 / norm;
            Ok(Solver::FixedPoint {
                f_map: bzt * ((1.0 - gamma) * w),
                g: h * w - DMatrix::identity(effectors, effectors),
                iterations,
                f: DVector::zeros(effectors),
                work: DVector::zeros(effectors),
            })
        }
    }
}

/// Snapshot of an allocator for the data log.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AllocLog {
    /// Number of valid objective entries.
    pub objectives: usize,
    /// Number of valid effector entries.
    pub effectors: usize,
    /// Objective of the last solve.
    pub objective: [f32; MAX_OBJECTIVES],
    /// Solution before saturation.
    pub unsaturated: [f32; MAX_EFFECTORS],
    /// Saturated effector commands.
    pub command: [f32; MAX_EFFECTORS],
    /// Objective not achieved by the saturated commands.
    pub residual: [f32; MAX_OBJECTIVES],
    /// Saturation flag per effector.
    pub saturation: [Saturation; MAX_EFFECTORS],
}

/// Control allocator with a precomputed solve operator.
pub struct Allocator {
    def: AllocationDef,
    solver: Solver,
    objective: DVector<f32>,
    demand: DVector<f32>,
    x: DVector<f32>,
    unsaturated: DVector<f32>,
    command: DVector<f32>,
    residual: DVector<f32>,
    saturation: Vec<Saturation>,
    saturated: bool,
}

impl Allocator {
    /// Validates the problem and factors the solve operator.
    pub fn new(def: AllocationDef) -> Result<Self, ConfigError> {
        def.validate()?;
        let solver = build_solver(&def)?;
        let (objectives, effectors) = def.cntrl_eff.shape();
        let command = def.u_pref.zip_zip_map(&def.u_min, &def.u_max, f32::clamp);

        info!(
            "allocator configured: {} objectives, {} effectors, {:?}",
            objectives, effectors, def.method
        );
        Ok(Self {
            solver,
            objective: DVector::zeros(objectives),
            demand: DVector::zeros(objectives),
            x: DVector::zeros(effectors),
            unsaturated: def.u_pref.clone(),
            command,
            residual: DVector::zeros(objectives),
            saturation: vec![Saturation::None; effectors],
            saturated: false,
            def,
        })
    }

    /// The allocation problem.
    pub fn def(&self) -> &AllocationDef {
        &self.def
    }

    /// Maps an objective vector onto saturated effector commands.
    ///
    /// Missing or non-finite objective entries are treated as zero demand.
    pub fn solve(&mut self, objective: &[f32]) -> &[f32] {
        let mut sanitized = false;
        for (i, target) in self.objective.iter_mut().enumerate() {
            let value = objective.get(i).copied().unwrap_or(0.0);
            *target = if value.is_finite() {
                value
            } else {
                sanitized = true;
                0.0
            };
        }
        if sanitized {
            warn!("non-finite allocation objective replaced with zero");
        }

        // b = v - B u_pref
        self.demand.copy_from(&self.objective);
        self.demand.gemv(-1.0, &self.def.cntrl_eff, &self.def.u_pref, 1.0);

        match &mut self.solver {
            Solver::Direct { operator } => {
                self.x.gemv(1.0, &*operator, &self.demand, 0.0);
            }
            Solver::FixedPoint {
                f_map,
                g,
                iterations,
                f,
                work,
            } => {
                f.gemv(1.0, &*f_map, &self.demand, 0.0);
                for _ in 0..*iterations {
                    work.copy_from(&*f);
                    work.gemv(-1.0, &*g, &self.x, 1.0);
                    for i in 0..work.len() {
                        let lo = self.def.u_min[i] - self.def.u_pref[i];
                        let hi = self.def.u_max[i] - self.def.u_pref[i];
                        self.x[i] = work[i].clamp(lo, hi);
                    }
                }
            }
        }

        self.unsaturated.copy_from(&self.x);
        self.unsaturated += &self.def.u_pref;

        let mut any = false;
        for i in 0..self.command.len() {
            let (value, flag) =
                Saturation::clip(self.unsaturated[i], self.def.u_min[i], self.def.u_max[i]);
            // A solution resting on a limit is reported, but only moving it
            // counts as saturating the solve.
            any |= value != self.unsaturated[i];
            self.command[i] = value;
            self.saturation[i] = flag;
        }
        if any && !self.saturated {
            warn!("allocation saturated");
        }
        self.saturated = any;

        // residual = v - B u_cmd
        self.residual.copy_from(&self.objective);
        self.residual.gemv(-1.0, &self.def.cntrl_eff, &self.command, 1.0);

        self.command.as_slice()
    }

    /// Saturated commands of the last solve.
    pub fn command(&self) -> &[f32] {
        self.command.as_slice()
    }

    /// Solution of the last solve before saturation.
    pub fn unsaturated(&self) -> &[f32] {
        self.unsaturated.as_slice()
    }

    /// Objective not achieved by the saturated commands, `v - B u_cmd`.
    pub fn residual(&self) -> &[f32] {
        self.residual.as_slice()
    }

    /// Saturation flag per effector.
    pub fn saturation(&self) -> &[Saturation] {
        &self.saturation
    }

    /// Snapshot for the data log.
    pub fn log(&self) -> AllocLog {
        let (objectives, effectors) = self.def.cntrl_eff.shape();
        let mut log = AllocLog {
            objectives,
            effectors,
            ..AllocLog::default()
        };
        copy_into(&mut log.objective, &self.objective);
        copy_into(&mut log.residual, &self.residual);
        copy_into(&mut log.unsaturated, &self.unsaturated);
        copy_into(&mut log.command, &self.command);
        log.saturation[..effectors].copy_from_slice(&self.saturation);
        log
    }
}

fn copy_into(dst: &mut [f32], src: &DVector<f32>) {
    dst[..src.len()].copy_from_slice(src.as_slice());
}
