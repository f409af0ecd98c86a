pub mod block_matrix;
pub mod linear;
pub mod preconditioner;
pub mod rebuild;
pub mod solver;
pub mod timing;
pub mod transient;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tolerance {
    Absolute(f64),
    Relative(f64),
    Combined(f64, f64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceMetric {
    L2Norm,
    MaxNorm,
}

/// Convergence criteria for iterative solvers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceCriteria {
    /// Residual norm relative to the first iteration's.
    Residual,
    /// Update norm relative to the unknown's norm.
    Update,
    Both,
}

/// Per-unknown convergence test of the Newton iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Convergence {
    pub criteria: ConvergenceCriteria,
    pub tolerance: Tolerance,
    pub metric: ConvergenceMetric,
}

impl Default for Convergence {
    fn default() -> Self {
        Self {
            criteria: ConvergenceCriteria::Update,
            tolerance: Tolerance::Combined(1e-14, 1e-10),
            metric: ConvergenceMetric::L2Norm,
        }
    }
}

impl Convergence {
    pub fn norm(&self, vector: &[f64]) -> f64 {
        match self.metric {
            ConvergenceMetric::L2Norm => vector.iter().map(|v| v * v).sum::<f64>().sqrt(),
            ConvergenceMetric::MaxNorm => vector.iter().fold(0.0, |m: f64, v| m.max(v.abs())),
        }
    }

    /// `reference` is the scale a relative tolerance is taken against.
    pub fn check_tolerance(&self, norm: f64, reference: f64) -> bool {
        match self.tolerance {
            Tolerance::Absolute(tol) => norm < tol,
            Tolerance::Relative(tol) => norm <= tol * reference,
            Tolerance::Combined(abs_tol, rel_tol) => norm < abs_tol || norm <= rel_tol * reference,
        }
    }

    /// Convergence of one unknown's slice of the system.
    pub fn check_convergence(
        &self,
        residual: &[f64],
        update: &[f64],
        solution: &[f64],
        initial_residual_norm: f64,
    ) -> bool {
        let residual_ok = || self.check_tolerance(self.norm(residual), initial_residual_norm);
        let update_ok = || self.check_tolerance(self.norm(update), self.norm(solution));
        match self.criteria {
            ConvergenceCriteria::Residual => residual_ok(),
            ConvergenceCriteria::Update => update_ok(),
            ConvergenceCriteria::Both => residual_ok() && update_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_update_criterion() {
        let conv = Convergence {
            tolerance: Tolerance::Relative(1e-3),
            ..Convergence::default()
        };
        assert!(conv.check_convergence(&[], &[1e-4], &[1.0], 0.0));
        assert!(!conv.check_convergence(&[], &[1e-2], &[1.0], 0.0));
        // A zero unknown converges only on a zero update.
        assert!(conv.check_convergence(&[], &[0.0], &[0.0], 0.0));
        assert!(!conv.check_convergence(&[], &[1e-30], &[0.0], 0.0));
    }

    #[test]
    fn max_norm() {
        let conv = Convergence {
            metric: ConvergenceMetric::MaxNorm,
            ..Convergence::default()
        };
        assert_eq!(conv.norm(&[1.0, -3.0, 2.0]), 3.0);
    }
}
