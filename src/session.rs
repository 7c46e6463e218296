//! Coordinated multi-rail ramp orchestration.
//!
//! A [`BiasSession`] owns the three instrument channels for the lifetime of
//! a test session and arbitrates access between the ramp path and any
//! foreign telemetry poller (each channel sits behind a single-writer async
//! lock; see [`crate::instrument::SharedChannel`]).
//!
//! One ramp request runs to completion before the next is accepted. There
//! is no preemption and no in-flight cancellation; the only stop conditions
//! are policy rejection before the first write and an I/O failure during a
//! step.
//!
//! # Sequencing rules
//!
//! The DC pair and the HV rail are never energized together, so a request
//! that energizes one group first drives the other group to zero. Within
//! the DC pair, pwell's level gates what psub is allowed to be:
//!
//! - pwell magnitude increasing: pwell ramps fully to its plateau first,
//!   then psub follows.
//! - pwell magnitude decreasing: psub ramps fully to zero first, then pwell
//!   comes down.
//! - pwell already at target: only psub moves.
//!
//! Either order above keeps every intermediate committed state inside the
//! safe-operating table.

use crate::error::{RampError, RampResult};
use crate::instrument::{RailId, SharedChannel};
use crate::plan::RampPlan;
use crate::policy::{self, BiasTarget, DutVariant, PolicyViolation};
use crate::ramper::RailRamper;
use crate::telemetry::{event_channel, EventReceiver, EventSender, StepSample};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default voltage increment between steps, volts.
pub const DEFAULT_STEP_VOLTS: f64 = 0.5;

/// Default settle time between applying a set-point and sampling current.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(100);

/// Pause between the two members of the DC pair.
pub const PAIR_SETTLE: Duration = Duration::from_millis(200);

/// Pause between ramping one rail group and the other.
pub const GROUP_SETTLE: Duration = Duration::from_millis(500);

/// One requested ramp: the target state plus request-scoped step parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RampRequest {
    /// Desired end state, absolute magnitudes.
    pub target: BiasTarget,
    /// Voltage increment between steps, volts. Must be positive.
    pub step: f64,
    /// Settle time between applying a set-point and sampling current.
    pub delay: Duration,
}

impl RampRequest {
    /// A request with the default step size and delay.
    pub fn new(target: BiasTarget) -> Self {
        Self {
            target,
            step: DEFAULT_STEP_VOLTS,
            delay: DEFAULT_STEP_DELAY,
        }
    }

    /// Override the step size.
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    /// Override the inter-step settle delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Caller-contract checks, run before any instrument command.
    fn validate(&self) -> RampResult<()> {
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(RampError::Contract(format!(
                "ramp step must be a positive voltage, got {}",
                self.step
            )));
        }
        let BiasTarget { hv, pwell, psub } = self.target;
        if !hv.is_finite() || !pwell.is_finite() || !psub.is_finite() {
            return Err(RampError::Contract(format!(
                "target magnitudes must be finite, got hv={hv} pwell={pwell} psub={psub}"
            )));
        }
        Ok(())
    }
}

/// Final state of one touched rail after a completed ramp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RailReport {
    /// The rail.
    pub rail: RailId,
    /// Read-back set-point, magnitude volts.
    pub level: f64,
    /// Measured current, amps.
    pub current: f64,
}

/// Result of one ramp request.
#[derive(Clone, Debug)]
pub enum RampOutcome {
    /// All touched rails reached their planned resting level. Reports carry
    /// the final read-back state per rail.
    Completed(Vec<RailReport>),
    /// The safety policy refused the target; no instrument command was
    /// issued.
    Rejected(PolicyViolation),
}

/// Authoritative read-back of all three rails, magnitude volts.
#[derive(Clone, Copy, Debug)]
struct RailLevels {
    hv: f64,
    pwell: f64,
    psub: f64,
}

/// Owns the rail channels and executes coordinated ramps.
pub struct BiasSession {
    hv: SharedChannel,
    pwell: SharedChannel,
    psub: SharedChannel,
    variant: DutVariant,
    events: EventSender,
}

impl BiasSession {
    /// Build a session over the three rail channels.
    pub fn new(
        hv: SharedChannel,
        pwell: SharedChannel,
        psub: SharedChannel,
        variant: DutVariant,
    ) -> Self {
        let (events, _) = event_channel();
        Self {
            hv,
            pwell,
            psub,
            variant,
            events,
        }
    }

    /// The chip variant this session validates against.
    pub fn variant(&self) -> DutVariant {
        self.variant
    }

    /// Subscribe to the per-step progress stream.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Shared handle to one rail's channel, for telemetry collaborators.
    /// Holders must take the lock per exchange and never interleave writes
    /// with a ramp step.
    pub fn channel(&self, rail: RailId) -> SharedChannel {
        match rail {
            RailId::Hv => Arc::clone(&self.hv),
            RailId::Pwell => Arc::clone(&self.pwell),
            RailId::Psub => Arc::clone(&self.psub),
        }
    }

    /// Execute one ramp request to completion.
    ///
    /// The request is validated in full before any instrument command is
    /// issued; a rejected request leaves the hardware untouched. Group
    /// exclusion is judged on the requested target state, so switching
    /// groups in one request is legal: the de-energizing group ramps to
    /// zero before the other group moves.
    pub async fn ramp(&self, request: &RampRequest) -> RampResult<RampOutcome> {
        request.validate()?;

        if let Err(violation) = policy::validate(&request.target, self.variant) {
            warn!(variant = %self.variant, %violation, "ramp request rejected");
            return Ok(RampOutcome::Rejected(violation));
        }

        let current = self.read_levels().await?;
        info!(
            hv = current.hv,
            pwell = current.pwell,
            psub = current.psub,
            "read back applied levels"
        );

        if request.target.dc_is_zero() {
            // Ground the DC pair (or confirm it), then move HV.
            self.ramp_dc_pair(&current, BiasTarget::grounded(), request)
                .await?;
            tokio::time::sleep(GROUP_SETTLE).await;
            self.ramp_rail(RailId::Hv, current.hv, request.target.hv, request)
                .await?;
        } else {
            // Ground HV (or confirm it), then move the pair.
            self.ramp_rail(RailId::Hv, current.hv, 0.0, request).await?;
            tokio::time::sleep(GROUP_SETTLE).await;
            self.ramp_dc_pair(&current, request.target, request).await?;
        }

        let reports = self.final_reports().await?;
        for report in &reports {
            info!(
                rail = %report.rail,
                level = report.level,
                current_a = report.current,
                "final rail state"
            );
        }
        Ok(RampOutcome::Completed(reports))
    }

    /// Ramp the DC pair in the order that never transits an unsafe
    /// pwell/psub combination.
    async fn ramp_dc_pair(
        &self,
        current: &RailLevels,
        target: BiasTarget,
        request: &RampRequest,
    ) -> RampResult<()> {
        if target.pwell > current.pwell {
            // Energizing: pwell reaches its plateau before psub rises.
            self.ramp_rail(RailId::Pwell, current.pwell, target.pwell, request)
                .await?;
            tokio::time::sleep(PAIR_SETTLE).await;
            self.ramp_rail(RailId::Psub, current.psub, target.psub, request)
                .await?;
        } else if target.pwell < current.pwell {
            // De-energizing: psub returns to zero before pwell leaves the
            // plateau.
            self.ramp_rail(RailId::Psub, current.psub, target.psub, request)
                .await?;
            tokio::time::sleep(PAIR_SETTLE).await;
            self.ramp_rail(RailId::Pwell, current.pwell, target.pwell, request)
                .await?;
        } else {
            // pwell already where it should be: only psub moves.
            self.ramp_rail(RailId::Psub, current.psub, target.psub, request)
                .await?;
        }
        Ok(())
    }

    /// Plan and run one rail's ramp.
    async fn ramp_rail(
        &self,
        rail: RailId,
        from: f64,
        to: f64,
        request: &RampRequest,
    ) -> RampResult<Vec<StepSample>> {
        let plan = RampPlan::new(from, to, request.step)?;
        let channel = self.channel(rail);
        RailRamper::new(rail, self.events.clone())
            .run(&channel, &plan, request.delay)
            .await
    }

    /// Authoritative read-back of every rail's applied level.
    async fn read_levels(&self) -> RampResult<RailLevels> {
        let hv = self.hv.lock().await.read_set_level().await?;
        let pwell = self.pwell.lock().await.read_set_level().await?;
        let psub = self.psub.lock().await.read_set_level().await?;
        Ok(RailLevels { hv, pwell, psub })
    }

    /// Final read-back voltage and current for every rail.
    async fn final_reports(&self) -> RampResult<Vec<RailReport>> {
        let mut reports = Vec::with_capacity(3);
        for rail in [RailId::Pwell, RailId::Psub, RailId::Hv] {
            let channel = self.channel(rail);
            let mut guard = channel.lock().await;
            let level = guard.read_set_level().await?;
            let current = guard.read_measurement().await?;
            reports.push(RailReport {
                rail,
                level,
                current,
            });
        }
        Ok(reports)
    }
}
