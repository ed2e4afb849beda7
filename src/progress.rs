//! Blended progress estimation.
//!
//! [`ProgressEstimator`] is a plain value: it never reads a clock and never
//! spawns anything. Callers feed it ticks, transfer samples and the elapsed
//! time since the session started, and it answers with the next visible
//! [`ProgressSample`]. That keeps it drivable from tests with any clock.
//!
//! Phases:
//!
//! * `Simulating` eases toward the simulated target while the transfer has
//!   not reported a usable ratio.
//! * `Tracking` follows the real `loaded / total` ratio, capped until the
//!   minimum visible duration has passed. Simulated ticks keep running next
//!   to it so a coarse transfer signal never freezes the bar; the larger of
//!   the two wins.
//! * `Ramping` interpolates up to the ramp target once the transfer has
//!   succeeded, spreading the remainder of the minimum duration over ticks.
//! * `Done` has emitted 100.
//!
//! Every emitted value is `max(floor, candidate)`, so the sequence never
//! decreases across phase changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ControllerConfig;

pub const COMPLETE_PERCENT: u8 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressSource {
    Simulated,
    Real,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub value: u8,
    pub source: ProgressSource,
    pub monotonic_floor: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstimatorPhase {
    Simulating,
    Tracking,
    Ramping,
    Done,
}

/// How the caller should drive the finish after a successful transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishPlan {
    /// Minimum duration already elapsed; the estimator is at 100.
    Immediate,
    /// Call [`ProgressEstimator::ramp_tick`] `steps` times, `interval` apart,
    /// then wait the grace delay and call [`ProgressEstimator::complete`].
    Ramp { steps: u32, interval: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RampStep {
    pub sample: ProgressSample,
    pub last: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorSettings {
    pub simulated_target: u8,
    pub simulated_damping: f64,
    pub real_signal_cap: u8,
    pub ramp_target: u8,
    pub min_visible_duration: Duration,
    pub ramp_tick: Duration,
}

impl EstimatorSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            simulated_target: config.simulated_target,
            simulated_damping: config.simulated_damping,
            real_signal_cap: config.real_signal_cap,
            ramp_target: config.ramp_target,
            min_visible_duration: config.min_visible_duration(),
            ramp_tick: config.ramp_tick(),
        }
    }
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct RampPlan {
    start: u8,
    steps: u32,
    per_step: f64,
    tick: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    Simulating,
    Tracking,
    Ramping(RampPlan),
    Done,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEstimator {
    settings: EstimatorSettings,
    phase: Phase,
    floor: u8,
    last_source: ProgressSource,
}

impl ProgressEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            settings,
            phase: Phase::Simulating,
            floor: 0,
            last_source: ProgressSource::Simulated,
        }
    }

    pub fn value(&self) -> u8 {
        self.floor
    }

    pub fn phase(&self) -> EstimatorPhase {
        match self.phase {
            Phase::Simulating => EstimatorPhase::Simulating,
            Phase::Tracking => EstimatorPhase::Tracking,
            Phase::Ramping(_) => EstimatorPhase::Ramping,
            Phase::Done => EstimatorPhase::Done,
        }
    }

    pub fn current(&self) -> ProgressSample {
        ProgressSample {
            value: self.floor,
            source: self.last_source,
            monotonic_floor: self.floor,
        }
    }

    /// One step of the simulated curve, never above the simulated target.
    /// `None` once the finish has begun.
    pub fn simulate_tick(&mut self) -> Option<ProgressSample> {
        if !matches!(self.phase, Phase::Simulating | Phase::Tracking) {
            return None;
        }
        let target = self.settings.simulated_target;
        let prev = self.floor;
        if prev >= target {
            return Some(self.current());
        }
        let gap = f64::from(target - prev);
        let delta = ((gap * self.settings.simulated_damping).round() as u8).max(1);
        let candidate = prev.saturating_add(delta).min(target);
        Some(self.emit(candidate, ProgressSource::Simulated))
    }

    /// Feeds a transfer progress event. Events without a computable ratio
    /// (unknown or zero total) are ignored and leave the simulation running.
    pub fn observe(
        &mut self,
        loaded: u64,
        total: Option<u64>,
        elapsed: Duration,
    ) -> Option<ProgressSample> {
        if matches!(self.phase, Phase::Ramping(_) | Phase::Done) {
            return None;
        }
        let total = total.filter(|t| *t > 0)?;
        let ratio = (loaded.min(total) as f64) / (total as f64);
        let mut pct = (ratio * 100.0).round() as u8;
        if elapsed < self.settings.min_visible_duration {
            pct = pct.min(self.settings.real_signal_cap);
        }
        self.phase = Phase::Tracking;
        Some(self.emit(pct, ProgressSource::Real))
    }

    /// Starts the finish after the transfer succeeded at `elapsed`.
    pub fn begin_finish(&mut self, elapsed: Duration) -> FinishPlan {
        if self.phase == Phase::Done {
            return FinishPlan::Immediate;
        }
        let remaining = self.settings.min_visible_duration.saturating_sub(elapsed);
        if remaining.is_zero() {
            self.complete();
            return FinishPlan::Immediate;
        }
        let tick_ms = self.settings.ramp_tick.as_millis().max(1);
        let steps = u32::try_from(remaining.as_millis() / tick_ms)
            .unwrap_or(u32::MAX)
            .max(1);
        let start = self.floor;
        let per_step = f64::from(self.settings.ramp_target.saturating_sub(start)) / f64::from(steps);
        self.phase = Phase::Ramping(RampPlan {
            start,
            steps,
            per_step,
            tick: 0,
        });
        FinishPlan::Ramp {
            steps,
            interval: self.settings.ramp_tick,
        }
    }

    /// Advances the finish ramp by one tick. `None` outside the ramp or after
    /// its last step.
    pub fn ramp_tick(&mut self) -> Option<RampStep> {
        let Phase::Ramping(mut plan) = self.phase else {
            return None;
        };
        if plan.tick >= plan.steps {
            return None;
        }
        plan.tick += 1;
        self.phase = Phase::Ramping(plan);
        let target = f64::from(plan.start) + plan.per_step * f64::from(plan.tick);
        let candidate = (target.round() as u8).min(self.settings.ramp_target);
        Some(RampStep {
            sample: self.emit(candidate, ProgressSource::Simulated),
            last: plan.tick >= plan.steps,
        })
    }

    pub fn complete(&mut self) -> ProgressSample {
        self.phase = Phase::Done;
        self.emit(COMPLETE_PERCENT, ProgressSource::Real)
    }

    fn emit(&mut self, candidate: u8, source: ProgressSource) -> ProgressSample {
        if candidate > self.floor {
            self.floor = candidate.min(COMPLETE_PERCENT);
            self.last_source = source;
        }
        ProgressSample {
            value: self.floor,
            source,
            monotonic_floor: self.floor,
        }
    }
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(EstimatorSettings::default())
    }
}
