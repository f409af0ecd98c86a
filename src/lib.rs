pub mod discretization;
pub mod error;
pub mod models;
pub mod numerics;
pub mod physics;
pub mod processing;
pub mod system;
pub mod unknowns;

pub use error::{FvmError, Result};
pub use system::EquationSystem;
