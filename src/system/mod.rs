//! The equation system model and the solve pipeline.
//!
//! - [`equation_system`]: `EquationSystem`, its components and lifecycle.
//! - [`any`]: `LinearSystem`, the runtime choice between real and complex.
//! - `assembly`: transform algebra and the caches kept between solves.
//! - `orchestrator`: `EquationSystem::solve`.

pub mod any;
pub(crate) mod assembly;
pub mod equation_system;
mod orchestrator;

pub use any::LinearSystem;
pub use equation_system::{EquationSystem, MatrixPart, SystemState, VectorPart};
