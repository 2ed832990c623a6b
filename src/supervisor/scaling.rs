//! # Pool Sizing
//!
//! The target moves only on operator commands; every tick compares the
//! number of worker processes with it.

use tracing::info;

use crate::config::PoolConfig;

/// Scaling action recommendations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingAction {
    /// Spawn this many workers
    ScaleUp { count: usize },
    /// Ask this many workers to stop
    ScaleDown { count: usize },
    NoChange,
}

/// Bounds and the current target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTarget {
    min: usize,
    max: usize,
    target: usize,
}

impl PoolTarget {
    pub fn new(min: usize, max: usize, target: usize) -> Self {
        Self {
            min,
            max,
            target: target.clamp(min, max),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.min_workers, config.max_workers, config.initial_target())
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// One more worker, up to the maximum. Returns whether the target moved.
    pub fn add_worker(&mut self) -> bool {
        if self.target >= self.max {
            info!(max = self.max, "🎛️ SCALING: Already at max workers");
            return false;
        }
        self.target += 1;
        info!(target = self.target, "🔼 SCALING: Target raised");
        true
    }

    /// Fall back to the minimum
    pub fn scale_down(&mut self) {
        self.target = self.min;
        info!(target = self.target, "🔽 SCALING: Target reset to minimum");
    }

    /// Compare `processes` (every worker still owned, stopping or not) and
    /// `running` (those not asked to stop) with the target
    pub fn evaluate(&self, processes: usize, running: usize) -> ScalingAction {
        if running > self.target {
            return ScalingAction::ScaleDown {
                count: running - self.target,
            };
        }
        let room = self.max.saturating_sub(processes);
        let count = self.target.saturating_sub(running).min(room);
        if count > 0 {
            ScalingAction::ScaleUp { count }
        } else {
            ScalingAction::NoChange
        }
    }
}
