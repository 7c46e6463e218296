//! Simulated instrument channel for testing without hardware.
//!
//! `MockChannel` implements [`InstrumentChannel`] directly, skipping the
//! protocol layer: it stores the applied level, records every application,
//! and returns a configurable current. Use it to test orchestration logic;
//! use [`crate::adapters::MockAdapter`] under a real [`super::SmuChannel`]
//! when the command traffic itself is under test.

use super::{InstrumentChannel, RailId};
use crate::error::{RampError, RampResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Shared, inspectable state of a [`MockChannel`].
#[derive(Debug, Default)]
pub struct MockChannelState {
    /// Currently applied level, magnitude volts.
    pub level: f64,
    /// Every level applied via `set_level`, in order.
    pub applied: Vec<f64>,
    /// Number of measurements taken.
    pub measurements: usize,
    /// Fail the Nth `set_level` call (0-based), once.
    pub fail_on_apply: Option<usize>,
}

/// In-memory [`InstrumentChannel`] with recorded state.
pub struct MockChannel {
    id: String,
    rail: RailId,
    current: f64,
    state: Arc<Mutex<MockChannelState>>,
}

impl MockChannel {
    /// Create a mock channel resting at 0 V, measuring 1 µA.
    pub fn new(rail: RailId) -> Self {
        Self {
            id: rail.name().to_string(),
            rail,
            current: 1.0e-6,
            state: Arc::new(Mutex::new(MockChannelState::default())),
        }
    }

    /// Start the channel at the given magnitude level.
    pub fn with_level(self, level: f64) -> Self {
        self.lock().level = level;
        self
    }

    /// Fixed current every measurement returns, amps.
    pub fn with_current(mut self, amps: f64) -> Self {
        self.current = amps;
        self
    }

    /// Fail the Nth `set_level` call (0-based) with an I/O error.
    pub fn fail_on_apply(self, nth: usize) -> Self {
        self.lock().fail_on_apply = Some(nth);
        self
    }

    /// Handle to the shared state, for inspection from tests.
    pub fn state(&self) -> Arc<Mutex<MockChannelState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockChannelState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl InstrumentChannel for MockChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn rail(&self) -> RailId {
        self.rail
    }

    async fn set_level(&mut self, volts: f64) -> RampResult<()> {
        let mut state = self.lock();
        if state.fail_on_apply == Some(state.applied.len()) {
            state.fail_on_apply = None;
            return Err(RampError::Io(std::io::Error::other(
                "injected set_level failure",
            )));
        }
        state.level = volts;
        state.applied.push(volts);
        Ok(())
    }

    async fn read_set_level(&mut self) -> RampResult<f64> {
        Ok(self.lock().level)
    }

    async fn read_measurement(&mut self) -> RampResult<f64> {
        self.lock().measurements += 1;
        Ok(self.current)
    }
}
