pub mod coefficients;
pub mod generator;
pub mod grid;

pub use coefficients::{FaceArray, FaceGrid};
pub use grid::{Grid, Metric, MomentumGrid, MomentumMetric, RadialGrid, RadialMetric};
