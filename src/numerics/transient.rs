use crate::error::{FvmError, Result};
use crate::numerics::solver::{Solver, SolverResult};
use crate::system::EquationSystem;

#[derive(Clone, Debug, PartialEq)]
pub struct TimeStepperSettings {
    pub t_start: f64,
    pub t_max: f64,
    /// Step length; mutually exclusive with `nt`.
    pub dt: Option<f64>,
    /// Number of steps; mutually exclusive with `dt`.
    pub nt: Option<usize>,
    /// Halvings of the step length tried after a numeric failure.
    pub max_retries: usize,
    pub min_dt: f64,
    /// Every n-th accepted step is kept in the output history.
    pub save_every: usize,
}

impl Default for TimeStepperSettings {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_max: 1.0,
            dt: None,
            nt: Some(100),
            max_retries: 5,
            min_dt: 1e-12,
            save_every: 1,
        }
    }
}

impl TimeStepperSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.t_max > self.t_start) {
            return Err(FvmError::config(format!(
                "t_max ({}) must exceed t_start ({})",
                self.t_max, self.t_start
            )));
        }
        match (self.dt, self.nt) {
            (Some(_), Some(_)) => Err(FvmError::config("only one of dt and nt may be set")),
            (None, None) => Err(FvmError::config("one of dt and nt must be set")),
            (Some(dt), None) if !(dt > 0.0 && dt.is_finite()) => {
                Err(FvmError::config(format!("invalid time step {dt}")))
            }
            (None, Some(0)) => Err(FvmError::config("nt must be positive")),
            _ if self.save_every == 0 => Err(FvmError::config("save_every must be positive")),
            _ if self.min_dt < 0.0 => Err(FvmError::config("min_dt must not be negative")),
            _ => Ok(()),
        }
    }

    /// Nominal step length.
    pub fn step_length(&self) -> f64 {
        match (self.dt, self.nt) {
            (Some(dt), _) => dt,
            (None, Some(nt)) => (self.t_max - self.t_start) / nt as f64,
            (None, None) => self.t_max - self.t_start,
        }
    }
}

/// Outcome of one accepted step.
#[derive(Clone, Debug)]
pub struct StepReport {
    pub step: usize,
    pub t: f64,
    pub dt: f64,
    pub retries: usize,
    pub saved: bool,
    pub result: SolverResult,
}

/// Steps from `t_start` to `t_max` with a constant step length, halving it
/// for a retry after a numeric failure.
pub struct ConstantTimeStepper {
    settings: TimeStepperSettings,
    dt: f64,
    t: f64,
    step: usize,
}

impl ConstantTimeStepper {
    pub fn new(settings: TimeStepperSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            dt: settings.step_length(),
            t: settings.t_start,
            step: 0,
            settings,
        })
    }

    pub fn settings(&self) -> &TimeStepperSettings {
        &self.settings
    }

    pub fn current_time(&self) -> f64 {
        self.t
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        let eps = 1e-12 * (self.settings.t_max - self.settings.t_start);
        self.settings.t_max - self.t <= eps
    }

    /// Takes one step, retrying with shorter steps on numeric failures.
    /// The unknowns are rolled back to the last accepted state before
    /// every retry and before a final error is returned.
    pub fn take_step(&mut self, solver: &mut Solver, system: &mut EquationSystem) -> Result<StepReport> {
        let mut dt = self.dt.min(self.settings.t_max - self.t);
        let mut retries = 0;
        loop {
            let t_new = self.t + dt;
            match solver.solve(system, t_new, dt) {
                Ok(result) => {
                    self.t = t_new;
                    self.step += 1;
                    let saved = self.step % self.settings.save_every == 0 || self.is_finished();
                    system.unknowns_mut().save_step(self.t, saved);
                    log::info!(
                        "Step {:>4} | t = {:.4e} | dt = {:.3e} | iters = {}",
                        self.step,
                        self.t,
                        dt,
                        result.iterations
                    );
                    return Ok(StepReport {
                        step: self.step,
                        t: self.t,
                        dt,
                        retries,
                        saved,
                        result,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "Step {:>4} | t = {:.4e} | dt = {:.3e} | FAILED: {}",
                        self.step + 1,
                        self.t,
                        dt,
                        e
                    );
                    system.unknowns_mut().restore();
                    let halved = 0.5 * dt;
                    if !e.is_recoverable() || retries >= self.settings.max_retries || halved < self.settings.min_dt {
                        return Err(e);
                    }
                    dt = halved;
                    retries += 1;
                }
            }
        }
    }

    /// Runs to `t_max`, calling `callback` after every accepted step.
    /// Returns the number of steps taken.
    pub fn run(
        &mut self,
        solver: &mut Solver,
        system: &mut EquationSystem,
        mut callback: impl FnMut(&StepReport, &EquationSystem),
    ) -> Result<usize> {
        log::info!(
            "Starting transient simulation: t = {:.3e} -> {:.3e}, dt = {:.3e}",
            self.settings.t_start,
            self.settings.t_max,
            self.dt
        );
        while !self.is_finished() {
            let report = self.take_step(solver, system)?;
            callback(&report, system);
        }
        solver.timers().log_summary();
        solver.timers().print_summary();
        Ok(self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nalgebra::DVector;
    use nalgebra_sparse::CsrMatrix;

    use crate::discretization::generator::cartesian_grid;
    use crate::numerics::linear::{SparseLu, LinearSolver};
    use crate::numerics::solver::SolverSettings;
    use crate::physics::equation::UnknownQuantityEquation;
    use crate::physics::identity::IdentityTerm;
    use crate::physics::transient::TransientTerm;
    use crate::unknowns::FluxGridType;

    fn decay() -> (EquationSystem, usize) {
        let grid = Arc::new(cartesian_grid(1, 1, 1).unwrap());
        let mut system = EquationSystem::new(grid);
        let x = system.define_unknown("x", "", 1, FluxGridType::Distribution).unwrap();
        system.unknowns_mut().set_initial_value(x, Some(&[1.0]), 0.0).unwrap();
        let mut eq = UnknownQuantityEquation::new(x, "dx/dt = -x");
        eq.add_term(x, TransientTerm::new(x)).unwrap();
        eq.add_term(x, IdentityTerm::weighted(1, -1.0)).unwrap();
        system.set_equation(eq).unwrap();
        (system, x)
    }

    /// Fails the first `failures` solves with a numeric error.
    struct Flaky {
        failures: usize,
    }

    impl LinearSolver for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn solve(&mut self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(FvmError::numeric("injected failure"));
            }
            SparseLu.solve(a, b)
        }
    }

    #[test]
    fn settings_need_exactly_one_of_dt_and_nt() {
        let both = TimeStepperSettings { dt: Some(0.1), nt: Some(10), ..Default::default() };
        assert!(both.validate().is_err());
        let neither = TimeStepperSettings { dt: None, nt: None, ..Default::default() };
        assert!(neither.validate().is_err());
        let backwards = TimeStepperSettings { t_max: -1.0, ..Default::default() };
        assert!(backwards.validate().is_err());
        let nt = TimeStepperSettings { nt: Some(4), ..Default::default() };
        assert_eq!(nt.step_length(), 0.25);
    }

    #[test]
    fn backward_euler_decay() {
        let (mut system, x) = decay();
        let mut solver = Solver::new(SolverSettings::default()).unwrap();
        solver.initialize_from_system(&system).unwrap();
        let settings = TimeStepperSettings { nt: Some(10), save_every: 5, ..Default::default() };
        let mut stepper = ConstantTimeStepper::new(settings).unwrap();

        let mut times = Vec::new();
        let steps = stepper.run(&mut solver, &mut system, |r, _| times.push(r.t)).unwrap();
        assert_eq!(steps, 10);
        assert!((times[9] - 1.0).abs() < 1e-12);

        let expected = 1.1f64.powi(-10);
        let got = system.unknowns().get_unknown_data(x).unwrap()[0];
        assert!((got - expected).abs() < 1e-12);
        // Initial value plus steps 5 and 10.
        assert_eq!(system.unknowns().get(x).unwrap().data.history_times().len(), 3);
    }

    #[test]
    fn failed_step_is_retried_with_half_the_step() {
        let (mut system, x) = decay();
        let mut solver = Solver::new(SolverSettings::default())
            .unwrap()
            .with_linear_solver(Flaky { failures: 1 });
        solver.initialize_from_system(&system).unwrap();
        let settings = TimeStepperSettings { dt: Some(0.5), nt: None, t_max: 0.5, ..Default::default() };
        let mut stepper = ConstantTimeStepper::new(settings).unwrap();

        let report = stepper.take_step(&mut solver, &mut system).unwrap();
        assert_eq!(report.retries, 1);
        assert_eq!(report.dt, 0.25);
        let got = system.unknowns().get_unknown_data(x).unwrap()[0];
        assert!((got - 1.0 / 1.25).abs() < 1e-12);
        assert!(!stepper.is_finished());
    }

    #[test]
    fn exhausted_retries_restore_the_state() {
        let (mut system, x) = decay();
        let mut solver = Solver::new(SolverSettings::default())
            .unwrap()
            .with_linear_solver(Flaky { failures: 10 });
        solver.initialize_from_system(&system).unwrap();
        let settings = TimeStepperSettings { nt: Some(1), max_retries: 2, ..Default::default() };
        let mut stepper = ConstantTimeStepper::new(settings).unwrap();

        let err = stepper.take_step(&mut solver, &mut system).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(system.unknowns().get_unknown_data(x).unwrap(), &[1.0]);
        assert_eq!(stepper.steps_taken(), 0);
    }
}
