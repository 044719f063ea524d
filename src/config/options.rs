//! Command-line or API options for the equation-system solver.
//!
//! `SolverParameters` is the single configuration record passed to every
//! lifecycle call of an equation system. Besides the settings it carries the
//! statistics of the last solve and the ILUT tuning memory that lets
//! repeated solves inside a nonlinear loop start from the last successful
//! fill-in/tolerance pair. Options can be set programmatically or parsed
//! from `name=value` strings.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use bitflags::bitflags;

use crate::error::EqError;

bitflags! {
    /// Which optional algebraic components take part in the assembly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Usage: u8 {
        /// Forwarding transform Tb
        const TB = 0b0001;
        /// Variable substitution Tv
        const TV = 0b0010;
        /// Row scaling Sr
        const SR = 0b0100;
        /// Column scaling Sc
        const SC = 0b1000;
    }
}

bitflags! {
    /// Files written during a solve.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OutputFlags: u8 {
        /// The combined system Tb·As+Ab, Tb·bs+bb
        const SYSTEM = 0b001;
        /// The leading block handed to the solver
        const INNER_SYSTEM = 0b010;
        /// Elimination flags, metadata, Tv, Sr, Sc sections
        const AUXILIARY = 0b100;
    }
}

/// Iterative method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterativeKind {
    #[default]
    BiCgStab,
    Gmres,
    /// Iterative refinement with the preconditioner ("ILU solve")
    Refinement,
}

/// Preconditioner used by the iterative methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreconditionerKind {
    None,
    Jacobi,
    #[default]
    Ilut,
    /// Complete LU
    Lu,
}

/// How much of the previous nonlinear step survives `allocate_newton`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum NewtonReuse {
    /// Rebuild everything
    #[default]
    Fresh = 0,
    /// Keep the sparsity pattern of As and Ab (values zeroed)
    KeepPattern = 1,
    /// Also keep the compiled transforms
    KeepCompiled = 2,
    /// Also keep the ordering
    KeepOrdering = 3,
}

impl NewtonReuse {
    pub fn from_level(level: u8) -> Result<Self, EqError> {
        match level {
            0 => Ok(Self::Fresh),
            1 => Ok(Self::KeepPattern),
            2 => Ok(Self::KeepCompiled),
            3 => Ok(Self::KeepOrdering),
            _ => Err(EqError::InvalidOption {
                name: String::from("newton_reuse"),
                message: format!("level {level} not in 0..=3"),
            }),
        }
    }
}

/// Which path produced the last solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Iterative,
    Backend,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => write!(f, "direct"),
            Strategy::Iterative => write!(f, "iterative"),
            Strategy::Backend => write!(f, "backend"),
        }
    }
}

/// Statistics of the last solve; written whether it succeeded or not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStatistics {
    /// Iterations used (maximum over right-hand sides)
    pub iterations: usize,
    pub fill_used: usize,
    pub tol_used: f64,
    /// Largest relative residual ‖b − A·x‖/‖b‖ over the right-hand sides
    pub accuracy_achieved: f64,
    pub work_used: u64,
    pub bytes_peak: u64,
    pub strategy: Option<Strategy>,
    /// Preconditioner set-ups tried by the iterative path
    pub attempts: usize,
    /// Equations removed by pre-elimination
    pub eliminated: usize,
    /// An assembled equation had no nonzero entry
    pub disconnected: bool,
    /// The assembled system was lost during pre-elimination
    pub destroyed: bool,
}

/// Fill-in and drop tolerance suggested by the last successful ILUT solve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IlutTuning {
    pub suggested_fill: Option<usize>,
    pub suggested_tol: Option<f64>,
}

/// Configuration record for every lifecycle call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverParameters {
    /// Number of equations
    pub dimension: usize,
    /// Number of right-hand sides sharing the matrix
    pub rhs_count: usize,

    pub direct: bool,
    pub iterative: bool,
    /// Hand the final system to the registered external backend instead
    pub use_backend: bool,
    pub iterative_kind: IterativeKind,
    pub preconditioner: PreconditionerKind,
    /// Krylov subspace size of GMRES(m)
    pub gmres_restart: usize,

    pub fill_min: usize,
    pub fill_max: usize,
    pub tol_min: f64,
    pub tol_max: f64,
    /// Relative residual target
    pub accuracy: f64,
    pub max_iterations: usize,
    /// Pivots below `pivot_threshold · max|row|` are rejected
    pub pivot_threshold: f64,

    pub work_limit: Option<u64>,
    pub byte_limit: Option<u64>,

    pub elimination: bool,
    pub bandwidth_reduction: bool,
    pub usage: Usage,
    /// The stored Tv is its inverse
    pub inverse_tv: bool,
    /// The stored Sr, Sc are their inverses
    pub inverse_scaling: bool,
    /// Fold row equilibration into Sr
    pub auto_scaling: bool,
    pub newton_reuse: NewtonReuse,

    pub verbosity: u8,
    /// Log iterative progress every this many iterations (0 = never)
    pub print_interval: usize,
    pub output: OutputFlags,
    pub output_dir: PathBuf,
    pub output_prefix: String,

    pub statistics: SolveStatistics,
    pub tuning: IlutTuning,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            dimension: 0,
            rhs_count: 1,
            direct: true,
            iterative: false,
            use_backend: false,
            iterative_kind: IterativeKind::default(),
            preconditioner: PreconditionerKind::default(),
            gmres_restart: 20,
            fill_min: 5,
            fill_max: 40,
            tol_min: 1e-6,
            tol_max: 1e-2,
            accuracy: 1e-10,
            max_iterations: 500,
            pivot_threshold: 1e-14,
            work_limit: None,
            byte_limit: None,
            elimination: true,
            bandwidth_reduction: true,
            usage: Usage::empty(),
            inverse_tv: false,
            inverse_scaling: false,
            auto_scaling: false,
            newton_reuse: NewtonReuse::default(),
            verbosity: 0,
            print_interval: 0,
            output: OutputFlags::empty(),
            output_dir: PathBuf::from("."),
            output_prefix: String::from("eqsys"),
            statistics: SolveStatistics::default(),
            tuning: IlutTuning::default(),
        }
    }
}

fn invalid(name: &str, message: impl Into<String>) -> EqError {
    EqError::InvalidOption {
        name: name.to_string(),
        message: message.into(),
    }
}

fn parse<V: FromStr>(name: &str, value: &str) -> Result<V, EqError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, format!("cannot parse {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, EqError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(name, format!("expected a boolean, got {other:?}"))),
    }
}

/// `none`/`unlimited` clear a limit.
fn parse_limit(name: &str, value: &str) -> Result<Option<u64>, EqError> {
    match value.trim() {
        "none" | "unlimited" => Ok(None),
        v => parse(name, v).map(Some),
    }
}

impl SolverParameters {
    /// Parameters for a system of `dimension` equations and one right-hand side.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Sets one named option from its string form.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), EqError> {
        match name {
            "dimension" => self.dimension = parse(name, value)?,
            "rhs" | "rhs_count" => self.rhs_count = parse(name, value)?,
            "solver" | "strategy" => match value.trim() {
                "direct" => (self.direct, self.iterative) = (true, false),
                "iterative" => (self.direct, self.iterative) = (false, true),
                "both" | "auto" => (self.direct, self.iterative) = (true, true),
                other => return Err(invalid(name, format!("unknown strategy {other:?}"))),
            },
            "direct" => self.direct = parse_bool(name, value)?,
            "iterative" => self.iterative = parse_bool(name, value)?,
            "use_backend" => self.use_backend = parse_bool(name, value)?,
            "ksp" | "iterative_kind" => {
                self.iterative_kind = match value.trim() {
                    "bicgstab" => IterativeKind::BiCgStab,
                    "gmres" => IterativeKind::Gmres,
                    "refine" | "ilu" => IterativeKind::Refinement,
                    other => return Err(invalid(name, format!("unknown method {other:?}"))),
                }
            }
            "pc" | "preconditioner" => {
                self.preconditioner = match value.trim() {
                    "none" => PreconditionerKind::None,
                    "jacobi" => PreconditionerKind::Jacobi,
                    "ilut" => PreconditionerKind::Ilut,
                    "lu" => PreconditionerKind::Lu,
                    other => return Err(invalid(name, format!("unknown preconditioner {other:?}"))),
                }
            }
            "gmres_restart" => self.gmres_restart = parse(name, value)?,
            "fill_min" => self.fill_min = parse(name, value)?,
            "fill_max" => self.fill_max = parse(name, value)?,
            "tol_min" => self.tol_min = parse(name, value)?,
            "tol_max" => self.tol_max = parse(name, value)?,
            "accuracy" => self.accuracy = parse(name, value)?,
            "max_iterations" | "lit_max" => self.max_iterations = parse(name, value)?,
            "pivot_threshold" => self.pivot_threshold = parse(name, value)?,
            "work_limit" => self.work_limit = parse_limit(name, value)?,
            "byte_limit" => self.byte_limit = parse_limit(name, value)?,
            "elimination" => self.elimination = parse_bool(name, value)?,
            "bandwidth_reduction" => self.bandwidth_reduction = parse_bool(name, value)?,
            "use_tb" => self.usage.set(Usage::TB, parse_bool(name, value)?),
            "use_tv" => self.usage.set(Usage::TV, parse_bool(name, value)?),
            "use_sr" => self.usage.set(Usage::SR, parse_bool(name, value)?),
            "use_sc" => self.usage.set(Usage::SC, parse_bool(name, value)?),
            "inverse_tv" => self.inverse_tv = parse_bool(name, value)?,
            "inverse_scaling" => self.inverse_scaling = parse_bool(name, value)?,
            "auto_scaling" => self.auto_scaling = parse_bool(name, value)?,
            "newton_reuse" => self.newton_reuse = NewtonReuse::from_level(parse(name, value)?)?,
            "verbosity" => self.verbosity = parse(name, value)?,
            "print_interval" => self.print_interval = parse(name, value)?,
            "write_system" => self.output.set(OutputFlags::SYSTEM, parse_bool(name, value)?),
            "write_inner_system" => self
                .output
                .set(OutputFlags::INNER_SYSTEM, parse_bool(name, value)?),
            "write_auxiliary" => self.output.set(OutputFlags::AUXILIARY, parse_bool(name, value)?),
            "output_dir" => self.output_dir = PathBuf::from(value.trim()),
            "output_prefix" => self.output_prefix = value.trim().to_string(),
            _ => return Err(invalid(name, "unknown option")),
        }
        Ok(())
    }

    /// Builds parameters from `name=value` strings applied over the defaults.
    pub fn from_options<I, S>(options: I) -> Result<Self, EqError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parms = Self::default();
        for option in options {
            let option = option.as_ref();
            let (name, value) = option
                .split_once('=')
                .ok_or_else(|| invalid(option, "expected name=value"))?;
            parms.set_option(name.trim(), value)?;
        }
        Ok(parms)
    }

    /// Consistency of the ranges and limits.
    pub fn validate(&self) -> Result<(), EqError> {
        if self.rhs_count == 0 {
            return Err(invalid("rhs_count", "at least one right-hand side is required"));
        }
        if self.fill_min > self.fill_max {
            return Err(invalid("fill_min", "must not exceed fill_max"));
        }
        if !(self.tol_min >= 0.0 && self.tol_min <= self.tol_max) {
            return Err(invalid("tol_min", "must lie in [0, tol_max]"));
        }
        if !(self.accuracy >= 0.0) {
            return Err(invalid("accuracy", "must be non-negative"));
        }
        if !self.direct && !self.iterative && !self.use_backend {
            return Err(invalid("solver", "no solving strategy enabled"));
        }
        Ok(())
    }
}
