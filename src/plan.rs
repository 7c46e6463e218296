//! Step sequence computation for a single-rail ramp.
//!
//! A [`RampPlan`] is the finite, ordered list of set-points a rail will be
//! driven through, from its currently applied level toward a target. Plans
//! are pure data: building one touches no hardware, and a plan can be
//! inspected or replayed freely.
//!
//! Set-points are spaced `step` volts apart, computed as `start ± i * step`
//! (index multiplication, so long plans do not accumulate floating-point
//! drift). The final set-point is the last one that does not pass the
//! target: when `step` does not evenly divide the distance, the ramp stops
//! short of the target rather than emitting a corrective final step. The
//! first set-point re-applies the current level.

use crate::error::{RampError, RampResult};

/// Upper bound on the number of set-points a single plan may hold.
///
/// A bound this size is unreachable in normal operation (a full 0 → 30 V HV
/// sweep at the 0.5 V default step is 61 points); it exists so a mistyped
/// microvolt step fails fast instead of allocating without limit.
pub const MAX_PLAN_POINTS: usize = 100_000;

/// Direction a plan moves in, toward its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RampDirection {
    /// Set-points increase toward the target.
    Up,
    /// Set-points decrease toward the target.
    Down,
}

/// An ordered, finite sequence of intermediate set-points for one rail.
#[derive(Clone, Debug, PartialEq)]
pub struct RampPlan {
    start: f64,
    end: f64,
    step: f64,
    points: Vec<f64>,
}

impl RampPlan {
    /// Build the set-point sequence from `start` toward `end`.
    ///
    /// `step` must be a positive, finite voltage; `start` and `end` must be
    /// finite. Violations fail fast with [`RampError::Contract`] before any
    /// instrument is touched.
    pub fn new(start: f64, end: f64, step: f64) -> RampResult<Self> {
        if !step.is_finite() || step <= 0.0 {
            return Err(RampError::Contract(format!(
                "ramp step must be a positive voltage, got {step}"
            )));
        }
        if !start.is_finite() || !end.is_finite() {
            return Err(RampError::Contract(format!(
                "ramp endpoints must be finite, got start={start} end={end}"
            )));
        }

        let mut points = Vec::new();
        if end >= start {
            for i in 0..=MAX_PLAN_POINTS {
                let level = start + i as f64 * step;
                if level > end {
                    break;
                }
                points.push(level);
            }
        } else {
            // The same inclusive bound applies on the way down. For a ramp
            // to zero this walks to exactly 0 when the step divides the
            // distance, and otherwise rests just above it: never below.
            for i in 0..=MAX_PLAN_POINTS {
                let level = start - i as f64 * step;
                if level < end {
                    break;
                }
                points.push(level);
            }
        }

        if points.len() > MAX_PLAN_POINTS {
            return Err(RampError::Contract(format!(
                "ramp from {start} V to {end} V at {step} V steps exceeds \
                 {MAX_PLAN_POINTS} set-points"
            )));
        }

        Ok(Self { start, end, step, points })
    }

    /// The set-points, in execution order.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Number of set-points in the plan.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when the plan holds no set-points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The level the ramp starts from.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// The requested target level. The last set-point may rest short of it.
    pub fn target(&self) -> f64 {
        self.end
    }

    /// The level the rail will actually rest at after the plan runs.
    pub fn final_level(&self) -> Option<f64> {
        self.points.last().copied()
    }

    /// Which way the plan moves.
    pub fn direction(&self) -> RampDirection {
        if self.end >= self.start {
            RampDirection::Up
        } else {
            RampDirection::Down
        }
    }
}
