use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::numerics::rebuild::RebuildStage;

/// Phases of a solve timed by the solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timer {
    Rebuild(RebuildStage),
    Matrix,
    Jacobian,
    Vector,
    Precondition,
    LinearSolve,
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timer::Rebuild(stage) => write!(f, "rebuild {stage}"),
            Timer::Matrix => f.write_str("matrix assembly"),
            Timer::Jacobian => f.write_str("Jacobian assembly"),
            Timer::Vector => f.write_str("residual assembly"),
            Timer::Precondition => f.write_str("preconditioning"),
            Timer::LinearSolve => f.write_str("linear solve"),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct TimingStats {
    pub samples: BTreeMap<Timer, Vec<Duration>>,
    pub total_time: Duration,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, timer: Timer, elapsed: Duration) {
        self.samples.entry(timer).or_default().push(elapsed);
        self.total_time += elapsed;
    }

    /// Adds the time elapsed since `start`.
    pub fn stop(&mut self, timer: Timer, start: Instant) {
        self.add(timer, start.elapsed());
    }

    pub fn total(&self, timer: Timer) -> Duration {
        self.samples.get(&timer).map_or(Duration::ZERO, |s| s.iter().sum())
    }

    pub fn count(&self, timer: Timer) -> usize {
        self.samples.get(&timer).map_or(0, Vec::len)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.total_time = Duration::ZERO;
    }

    /// Writes the per-phase totals to the debug log.
    pub fn log_summary(&self) {
        for (timer, samples) in &self.samples {
            let total: Duration = samples.iter().sum();
            log::debug!(
                "{timer:<36} {:>9.3}ms over {} calls",
                total.as_secs_f64() * 1000.0,
                samples.len()
            );
        }
    }

    #[cfg(feature = "timing")]
    pub fn print_summary(&self) {
        if self.samples.is_empty() {
            return;
        }

        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "SOLVER TIMING SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Total timed:                   {:.3}s",
            self.total_time.as_secs_f64()
        );
        println!("{}", "-".repeat(60));
        println!("Component breakdown:");
        for (timer, samples) in &self.samples {
            let total: Duration = samples.iter().sum();
            println!(
                "  {:<30} {:>9.3}ms  (avg: {:>9.3}ms)",
                timer.to_string(),
                total.as_secs_f64() * 1000.0,
                total.as_secs_f64() * 1000.0 / samples.len() as f64
            );
        }
        println!("{}", "=".repeat(60));
    }

    #[cfg(not(feature = "timing"))]
    pub fn print_summary(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_per_timer() {
        let mut stats = TimingStats::new();
        stats.add(Timer::Matrix, Duration::from_millis(2));
        stats.add(Timer::Matrix, Duration::from_millis(3));
        stats.add(Timer::Rebuild(RebuildStage::Terms), Duration::from_millis(1));
        assert_eq!(stats.total(Timer::Matrix), Duration::from_millis(5));
        assert_eq!(stats.count(Timer::Matrix), 2);
        assert_eq!(stats.count(Timer::LinearSolve), 0);
        assert_eq!(stats.total_time, Duration::from_millis(6));
        stats.reset();
        assert!(stats.samples.is_empty());
    }
}
