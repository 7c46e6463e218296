//! Instrument channels: one source-measure unit per bias rail.
//!
//! An [`InstrumentChannel`] is the controller's view of one SMU: set a
//! voltage, read back the applied voltage, read one current measurement.
//! Channels speak user-facing absolute magnitudes; the hardware sign
//! convention (the DC pair is biased negative, HV positive) is applied at
//! this boundary and nowhere else, so the planner and the safety policy
//! never see a signed level.
//!
//! Channels are shared between the ramp path and any foreign telemetry
//! poller through a single-writer async lock ([`SharedChannel`]). The lock
//! is held for one request/response exchange at a time, which keeps the
//! write-then-read pairing of the underlying protocol intact.

pub mod mock;
pub mod smu;

pub use mock::MockChannel;
pub use smu::SmuChannel;

use crate::error::RampResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Identity and hardware polarity of one bias rail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RailId {
    /// High-voltage bias rail, driven positive.
    Hv,
    /// pwell member of the DC pair, driven negative.
    Pwell,
    /// psub member of the DC pair, driven negative.
    Psub,
}

impl RailId {
    /// Rail name as used in logs and configuration.
    pub fn name(self) -> &'static str {
        match self {
            RailId::Hv => "HV",
            RailId::Pwell => "pwell",
            RailId::Psub => "psub",
        }
    }

    /// True for rails whose hardware level is the negated magnitude.
    pub fn is_inverted(self) -> bool {
        matches!(self, RailId::Pwell | RailId::Psub)
    }

    /// Convert a user-facing magnitude to the signed hardware level.
    pub fn to_hardware(self, magnitude: f64) -> f64 {
        if self.is_inverted() {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Convert a signed hardware level back to a user-facing magnitude.
    pub fn from_hardware(self, level: f64) -> f64 {
        if self.is_inverted() {
            -level
        } else {
            level
        }
    }
}

impl fmt::Display for RailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One source-measure unit, pre-configured for its rail.
///
/// Source function, ranges and compliance limits are set up before the
/// controller touches the channel; these methods only move the set-point
/// and sample telemetry.
#[async_trait]
pub trait InstrumentChannel: Send + Sync {
    /// Channel identifier for logs and errors.
    fn id(&self) -> &str;

    /// The rail this channel drives.
    fn rail(&self) -> RailId;

    /// Apply a new set-point, in user-facing magnitude volts.
    async fn set_level(&mut self, volts: f64) -> RampResult<()>;

    /// Read back the currently applied set-point, in magnitude volts.
    ///
    /// This is the authoritative level; callers never trust a cached value.
    async fn read_set_level(&mut self) -> RampResult<f64>;

    /// Take one current measurement, in amps.
    async fn read_measurement(&mut self) -> RampResult<f64>;
}

/// A channel shared between the ramp path and foreign telemetry readers.
pub type SharedChannel = Arc<Mutex<Box<dyn InstrumentChannel>>>;

/// Wrap a channel for shared access.
pub fn shared(channel: impl InstrumentChannel + 'static) -> SharedChannel {
    Arc::new(Mutex::new(Box::new(channel)))
}
