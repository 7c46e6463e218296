//! Progress events emitted while a ramp runs.
//!
//! Every executed step produces a [`StepSample`]; rail transitions bracket
//! them. Events go out on a `tokio::sync::broadcast` channel so any number
//! of consumers (CLI printer, plot feed, log sink) can subscribe
//! independently without slowing the ramp down. Types are serde-friendly so
//! a collaborator can persist them as-is.

use crate::instrument::RailId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the progress broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One executed ramp step: the applied set-point and the current sampled
/// after the settle delay.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSample {
    /// UTC timestamp of the measurement.
    pub timestamp: DateTime<Utc>,
    /// Rail the step was applied to.
    pub rail: RailId,
    /// Applied set-point, magnitude volts.
    pub level: f64,
    /// Measured current, amps.
    pub current: f64,
}

impl StepSample {
    /// Build a sample stamped with the current time.
    pub fn now(rail: RailId, level: f64, current: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            rail,
            level,
            current,
        }
    }
}

/// Progress notifications for one ramp request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RampEvent {
    /// A rail is about to ramp from `from` toward `to` (magnitude volts).
    RailStarted { rail: RailId, from: f64, to: f64 },
    /// One step executed.
    Step(StepSample),
    /// A rail finished its plan and rests at `level`.
    RailCompleted { rail: RailId, level: f64 },
}

/// Sending half of the progress stream.
pub type EventSender = broadcast::Sender<RampEvent>;

/// Receiving half of the progress stream.
pub type EventReceiver = broadcast::Receiver<RampEvent>;

/// Create a progress channel with the standard capacity.
pub fn event_channel() -> (EventSender, EventReceiver) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}
