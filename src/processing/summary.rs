use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use crate::numerics::solver::{Solver, SolverType};
use crate::numerics::timing::Timer;
use crate::system::EquationSystem;

/// Final state of one unknown at the end of a run.
pub struct UnknownSummary {
    pub name: String,
    pub size: usize,
    pub nontrivial: bool,
    pub min: f64,
    pub max: f64,
    pub l2_norm: f64,
}

pub struct RunSummary {
    // Grid info
    pub nr: usize,
    pub momentum_shape: (usize, usize),
    pub num_cells: usize,
    pub radial_extent: (f64, f64),

    // Solver info
    pub solver_kind: SolverType,
    pub system_size: usize,
    pub steps: usize,
    pub final_time: f64,
    pub newton_iterations: Option<usize>,

    pub unknowns: Vec<UnknownSummary>,
    pub timings: Vec<(Timer, Duration, usize)>,
}

impl RunSummary {
    pub fn from_run(system: &EquationSystem, solver: &Solver, steps: usize, final_time: f64) -> Self {
        let grid = system.grid();
        let r_f = grid.radial().r_f();
        let nontrivial = solver.nontrivial_unknowns();

        let unknowns = system
            .unknowns()
            .iter()
            .map(|u| {
                let data = u.data.data();
                UnknownSummary {
                    name: u.name.clone(),
                    size: data.len(),
                    nontrivial: nontrivial.contains(&u.id),
                    min: data.iter().copied().fold(f64::INFINITY, f64::min),
                    max: data.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    l2_norm: data.iter().map(|v| v * v).sum::<f64>().sqrt(),
                }
            })
            .collect();

        let timings = solver
            .timers()
            .samples
            .iter()
            .map(|(timer, samples)| (*timer, samples.iter().sum::<Duration>(), samples.len()))
            .collect();

        Self {
            nr: grid.nr(),
            momentum_shape: grid.momentum(0).shape(),
            num_cells: grid.ncells(),
            radial_extent: (r_f[0], r_f[r_f.len() - 1]),
            solver_kind: solver.settings().kind,
            system_size: solver.size(),
            steps,
            final_time,
            newton_iterations: None,
            unknowns,
            timings,
        }
    }

    pub fn add_newton_iterations(&mut self, iterations: usize) {
        *self.newton_iterations.get_or_insert(0) += iterations;
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;

        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file, "PLASMA FVM RUN SUMMARY")?;
        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file)?;

        writeln!(file, "GRID")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Radial cells:        {}", self.nr)?;
        writeln!(
            file,
            "Momentum cells:      {} x {}",
            self.momentum_shape.0, self.momentum_shape.1
        )?;
        writeln!(file, "Total cells:         {}", self.num_cells)?;
        writeln!(
            file,
            "Radial extent:       {:.6e} to {:.6e}",
            self.radial_extent.0, self.radial_extent.1
        )?;
        writeln!(file)?;

        writeln!(file, "SOLVER")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Type:                {:?}", self.solver_kind)?;
        writeln!(file, "System size:         {}", self.system_size)?;
        writeln!(file, "Time steps:          {}", self.steps)?;
        writeln!(file, "Final time:          {:.6e}", self.final_time)?;
        if let Some(iter) = self.newton_iterations {
            writeln!(file, "Newton iterations:   {}", iter)?;
        }
        writeln!(file)?;

        writeln!(file, "UNKNOWNS")?;
        writeln!(file, "{}", "-".repeat(60))?;
        for u in &self.unknowns {
            writeln!(
                file,
                "{:<14} {:>7} {:<11} min {:>11.4e}  max {:>11.4e}  |.| {:>10.4e}",
                u.name,
                u.size,
                if u.nontrivial { "solved" } else { "prescribed" },
                u.min,
                u.max,
                u.l2_norm
            )?;
        }
        writeln!(file)?;

        if !self.timings.is_empty() {
            writeln!(file, "TIMING")?;
            writeln!(file, "{}", "-".repeat(60))?;
            for (timer, total, calls) in &self.timings {
                writeln!(
                    file,
                    "{:<34} {:>10.3}ms  ({} calls)",
                    timer.to_string(),
                    total.as_secs_f64() * 1000.0,
                    calls
                )?;
            }
            writeln!(file)?;
        }

        writeln!(file, "{}", "=".repeat(60))?;

        Ok(())
    }

    pub fn print_to_console(&self) {
        println!("\n{}", "=".repeat(60));
        println!("RUN SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Grid:          {} radii x {}x{} momentum cells",
            self.nr, self.momentum_shape.0, self.momentum_shape.1
        );
        println!(
            "Solver:        {:?}, {} rows, {} steps to t = {:.3e}",
            self.solver_kind, self.system_size, self.steps, self.final_time
        );
        if let Some(iter) = self.newton_iterations {
            println!("Iterations:    {}", iter);
        }
        for u in &self.unknowns {
            println!("  {:<14} |.| = {:.4e}", u.name, u.l2_norm);
        }
        println!("{}\n", "=".repeat(60));
    }
}
