//! Solver configuration.

pub mod options;

pub use options::{
    IlutTuning, IterativeKind, NewtonReuse, OutputFlags, PreconditionerKind, SolveStatistics,
    SolverParameters, Strategy, Usage,
};
