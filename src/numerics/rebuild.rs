use std::fmt;

use crate::error::{FvmError, Result};
use crate::unknowns::UnknownQuantityHandler;

/// Stages of the per-step rebuild. Each stage may only read quantities
/// produced by the stages it depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RebuildStage {
    CollisionHandlers,
    FluidClosures,
    Predetermined,
    SpiHandlers,
    Terms,
}

impl RebuildStage {
    pub const ALL: [RebuildStage; 5] = [
        RebuildStage::CollisionHandlers,
        RebuildStage::FluidClosures,
        RebuildStage::Predetermined,
        RebuildStage::SpiHandlers,
        RebuildStage::Terms,
    ];

    /// Stages that must be current before this one is rebuilt.
    pub fn depends_on(self) -> &'static [RebuildStage] {
        match self {
            RebuildStage::CollisionHandlers | RebuildStage::Predetermined => &[],
            RebuildStage::FluidClosures => &[RebuildStage::CollisionHandlers],
            RebuildStage::SpiHandlers => &[RebuildStage::Predetermined],
            RebuildStage::Terms => &[
                RebuildStage::CollisionHandlers,
                RebuildStage::FluidClosures,
                RebuildStage::Predetermined,
                RebuildStage::SpiHandlers,
            ],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RebuildStage::CollisionHandlers => "collision handlers",
            RebuildStage::FluidClosures => "fluid closures",
            RebuildStage::Predetermined => "predetermined unknowns",
            RebuildStage::SpiHandlers => "SPI handlers",
            RebuildStage::Terms => "equation terms",
        }
    }
}

impl fmt::Display for RebuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Topological order of `stages` under `deps`, ties broken by the order of
/// `stages` (Kahn's algorithm).
pub fn topological_order<F>(stages: &[RebuildStage], deps: F) -> Result<Vec<RebuildStage>>
where
    F: Fn(RebuildStage) -> &'static [RebuildStage],
{
    let mut indegree: Vec<usize> = stages
        .iter()
        .map(|s| deps(*s).iter().filter(|d| stages.contains(d)).count())
        .collect();
    let mut done = vec![false; stages.len()];
    let mut order = Vec::with_capacity(stages.len());

    while order.len() < stages.len() {
        let next = (0..stages.len()).find(|&k| !done[k] && indegree[k] == 0);
        let Some(k) = next else {
            return Err(FvmError::config("cyclic dependency between rebuild stages"));
        };
        done[k] = true;
        order.push(stages[k]);
        for (m, s) in stages.iter().enumerate() {
            if !done[m] && deps(*s).contains(&stages[k]) {
                indegree[m] -= 1;
            }
        }
    }
    Ok(order)
}

/// Order in which the solver rebuilds the stages.
pub fn rebuild_order() -> Result<Vec<RebuildStage>> {
    topological_order(&RebuildStage::ALL, RebuildStage::depends_on)
}

/// A physics component computing derived quantities read by the terms'
/// coefficient models, rebuilt once per solve at its stage.
pub trait AuxiliaryHandler {
    fn name(&self) -> &str;

    fn stage(&self) -> RebuildStage;

    fn rebuild(&mut self, t: f64, dt: f64, unknowns: &UnknownQuantityHandler) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_follow_dependencies() {
        let order = rebuild_order().unwrap();
        assert_eq!(order.len(), 5);
        let pos = |s: RebuildStage| order.iter().position(|o| *o == s).unwrap();
        for stage in RebuildStage::ALL {
            for dep in stage.depends_on() {
                assert!(pos(*dep) < pos(stage), "{dep} must precede {stage}");
            }
        }
        assert_eq!(order.last(), Some(&RebuildStage::Terms));
    }

    #[test]
    fn cycles_are_rejected() {
        fn cyclic(s: RebuildStage) -> &'static [RebuildStage] {
            match s {
                RebuildStage::FluidClosures => &[RebuildStage::Terms],
                RebuildStage::Terms => &[RebuildStage::FluidClosures],
                _ => &[],
            }
        }
        assert!(topological_order(&RebuildStage::ALL, cyclic).is_err());
    }
}
