//! Single-rail ramp execution.
//!
//! A [`RailRamper`] walks one channel through a [`RampPlan`]: apply the
//! set-point, wait the settle delay, sample the current, emit the step. The
//! channel lock is held for exactly one step's exchange and released during
//! the post-measure settle, which is the window where a foreign telemetry
//! poller may read the instrument.
//!
//! Every applied set-point is an irreversible instrument command. When a
//! step fails, the remaining plan is abandoned and the error reports the
//! last set-point that was successfully applied: the instrument is resting
//! there, not at the ramp's start.

use crate::error::{RampError, RampResult};
use crate::instrument::{RailId, SharedChannel};
use crate::plan::{RampDirection, RampPlan};
use crate::telemetry::{EventSender, RampEvent, StepSample};
use std::time::Duration;
use tracing::{debug, info};

/// Pause after each measurement before the next step, with the channel lock
/// released. Gives the source a quiet window and telemetry pollers a slot.
pub const POST_MEASURE_SETTLE: Duration = Duration::from_millis(100);

/// Drives one instrument channel through a ramp plan.
pub struct RailRamper {
    rail: RailId,
    events: EventSender,
}

impl RailRamper {
    /// Create a ramper for one rail, emitting progress on `events`.
    pub fn new(rail: RailId, events: EventSender) -> Self {
        Self { rail, events }
    }

    /// Execute the plan. Returns the executed steps in order.
    ///
    /// `delay` is the settle time between applying a set-point and sampling
    /// the current. On an I/O failure the remaining plan is abandoned and
    /// [`RampError::Aborted`] carries the last successfully applied level.
    pub async fn run(
        &self,
        channel: &SharedChannel,
        plan: &RampPlan,
        delay: Duration,
    ) -> RampResult<Vec<StepSample>> {
        let verb = match plan.direction() {
            RampDirection::Up => "up",
            RampDirection::Down => "down",
        };
        info!(
            rail = %self.rail,
            from = plan.start(),
            to = plan.target(),
            steps = plan.len(),
            "ramping {} {verb} to {} V",
            self.rail,
            plan.target()
        );
        let _ = self.events.send(RampEvent::RailStarted {
            rail: self.rail,
            from: plan.start(),
            to: plan.target(),
        });

        let mut steps = Vec::with_capacity(plan.len());
        let mut last_applied: Option<f64> = None;

        for &level in plan.points() {
            let current = {
                let mut guard = channel.lock().await;
                if let Err(source) = guard.set_level(level).await {
                    return Err(self.abort(source, last_applied));
                }
                last_applied = Some(level);
                tokio::time::sleep(delay).await;
                match guard.read_measurement().await {
                    Ok(current) => current,
                    Err(source) => return Err(self.abort(source, last_applied)),
                }
            };

            let sample = StepSample::now(self.rail, level, current);
            debug!(rail = %self.rail, level, current, "step");
            let _ = self.events.send(RampEvent::Step(sample));
            steps.push(sample);

            tokio::time::sleep(POST_MEASURE_SETTLE).await;
        }

        if let Some(level) = last_applied {
            let _ = self.events.send(RampEvent::RailCompleted {
                rail: self.rail,
                level,
            });
        }
        Ok(steps)
    }

    fn abort(&self, source: RampError, last_applied: Option<f64>) -> RampError {
        RampError::Aborted {
            rail: self.rail,
            last_applied,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{shared, MockChannel};
    use crate::telemetry::event_channel;

    #[tokio::test(start_paused = true)]
    async fn executes_every_planned_step_in_order() {
        let channel = MockChannel::new(RailId::Pwell).with_current(2.0e-3);
        let state = channel.state();
        let channel = shared(channel);
        let (events, mut rx) = event_channel();

        let plan = RampPlan::new(0.0, 2.0, 0.5).unwrap();
        let ramper = RailRamper::new(RailId::Pwell, events);
        let steps = ramper
            .run(&channel, &plan, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(steps.len(), 5);
        assert_eq!(
            state.lock().unwrap().applied,
            vec![0.0, 0.5, 1.0, 1.5, 2.0]
        );
        assert!(steps.iter().all(|s| s.current == 2.0e-3));

        // RailStarted, five steps, RailCompleted.
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            count += 1;
            if let RampEvent::RailCompleted { level, .. } = event {
                assert_eq!(level, 2.0);
            }
        }
        assert_eq!(count, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_mid_plan_reports_resting_level() {
        // Third application (index 2) fails: 0.0 and 0.5 are applied, the
        // instrument rests at 0.5.
        let channel = MockChannel::new(RailId::Hv).fail_on_apply(2);
        let state = channel.state();
        let channel = shared(channel);
        let (events, _rx) = event_channel();

        let plan = RampPlan::new(0.0, 3.0, 0.5).unwrap();
        let ramper = RailRamper::new(RailId::Hv, events);
        let err = ramper
            .run(&channel, &plan, Duration::ZERO)
            .await
            .unwrap_err();

        assert_eq!(err.resting_level(), Some(0.5));
        assert_eq!(state.lock().unwrap().applied, vec![0.0, 0.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_write_failure_has_no_resting_level() {
        let channel = shared(MockChannel::new(RailId::Hv).fail_on_apply(0));
        let (events, _rx) = event_channel();

        let plan = RampPlan::new(0.0, 1.0, 0.5).unwrap();
        let err = RailRamper::new(RailId::Hv, events)
            .run(&channel, &plan, Duration::ZERO)
            .await
            .unwrap_err();

        assert_eq!(err.resting_level(), None);
    }
}
