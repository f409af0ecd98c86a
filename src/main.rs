use std::fs;
use std::sync::Arc;

use plasma_fvm::EquationSystem;
use plasma_fvm::discretization::generator::fluid_grid;
use plasma_fvm::models::kinetic::{KineticSettings, kinetic_system};
use plasma_fvm::models::poloidal_flux::poloidal_flux_system;
use plasma_fvm::numerics::solver::{Solver, SolverSettings, SolverType};
use plasma_fvm::numerics::transient::{ConstantTimeStepper, TimeStepperSettings};
use plasma_fvm::physics::prescribed::DataSource;
use plasma_fvm::processing::csv_writer;
use plasma_fvm::processing::summary::RunSummary;

const OUTPUT_DIR: &str = "output/main";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    fs::create_dir_all(OUTPUT_DIR).expect("Failed to create output directory");

    run_poloidal_flux();
    run_kinetic();
}

/// Flux driven by a loop voltage ramped up over the first half of the run.
fn run_poloidal_flux() {
    let nr = 10;
    let grid = Arc::new(fluid_grid(nr, 0.5).expect("Failed to build grid"));
    let v_loop = DataSource::TimeSeries {
        times: vec![0.0, 0.5, 1.0],
        values: vec![vec![0.0; nr], vec![1.0; nr], vec![1.0; nr]],
    };
    let (mut system, ids) =
        poloidal_flux_system(grid, v_loop, None, 0.0).expect("Failed to build poloidal flux system");

    let mut solver = Solver::new(SolverSettings::default()).expect("Invalid solver settings");
    solver.initialize_from_system(&system).expect("Failed to initialize solver");

    let settings = TimeStepperSettings {
        nt: Some(20),
        ..TimeStepperSettings::default()
    };
    let mut stepper = ConstantTimeStepper::new(settings).expect("Invalid time stepper settings");
    let steps = stepper
        .run(&mut solver, &mut system, |_, _| {})
        .expect("Poloidal flux run failed");

    let psi = system.unknowns().get(ids.psi).expect("psi is defined");
    csv_writer::write_history(format!("{OUTPUT_DIR}/psi_p.csv"), psi).expect("Failed to write psi history");
    save_radial_profile(&system, ids.psi, "psi_p");

    let summary = RunSummary::from_run(&system, &solver, steps, stepper.current_time());
    summary
        .write_to_file(format!("{OUTPUT_DIR}/poloidal_flux_summary.txt"))
        .expect("Failed to write summary");
    summary.print_to_console();
}

/// Runaway-like distribution: field acceleration against pitch-angle
/// scattering with radial losses, solved with Newton's method.
fn run_kinetic() {
    let settings = KineticSettings {
        nr: 5,
        np: 20,
        nxi: 10,
        e_applied: 0.2,
        ..KineticSettings::default()
    };
    let (mut system, ids) = kinetic_system(&settings, |r, p, _xi| (1.0 - r * r) * (-p * p).exp())
        .expect("Failed to build kinetic system");

    let solver_settings = SolverSettings {
        kind: SolverType::NonLinear,
        max_iterations: 20,
        verbose: true,
        ..SolverSettings::default()
    };
    let mut solver = Solver::new(solver_settings).expect("Invalid solver settings");
    solver.initialize_from_system(&system).expect("Failed to initialize solver");

    let stepper_settings = TimeStepperSettings {
        t_max: 2.0,
        dt: Some(0.1),
        nt: None,
        save_every: 5,
        ..TimeStepperSettings::default()
    };
    let mut stepper = ConstantTimeStepper::new(stepper_settings).expect("Invalid time stepper settings");

    let grid = Arc::clone(system.grid());
    let mut iterations = 0;
    let mut density = Vec::new();
    let mut times = Vec::new();
    let steps = stepper
        .run(&mut solver, &mut system, |report, system| {
            iterations += report.result.iterations;
            let f = system.unknowns().get_unknown_data(ids.f).unwrap_or(&[]);
            times.push(report.t);
            density.push(grid.integrate(f));
        })
        .expect("Kinetic run failed");

    csv_writer::write_xy(format!("{OUTPUT_DIR}/kinetic_density.csv"), "t", "n", &times, &density)
        .expect("Failed to write density");
    let f = system.unknowns().get(ids.f).expect("f is defined");
    csv_writer::write_history(format!("{OUTPUT_DIR}/f.csv"), f).expect("Failed to write f history");

    let mut summary = RunSummary::from_run(&system, &solver, steps, stepper.current_time());
    summary.add_newton_iterations(iterations);
    summary
        .write_to_file(format!("{OUTPUT_DIR}/kinetic_summary.txt"))
        .expect("Failed to write summary");
    summary.print_to_console();
}

fn save_radial_profile(system: &EquationSystem, id: usize, name: &str) {
    let r = system.grid().radial().r().to_vec();
    let values = system.unknowns().get_unknown_data(id).expect("unknown is defined");
    csv_writer::write_xy(format!("{OUTPUT_DIR}/{name}_profile.csv"), "r", name, &r, values)
        .expect("Failed to write profile");
    println!("Profile saved to {OUTPUT_DIR}/{name}_profile.csv");
}
