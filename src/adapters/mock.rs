//! Command-recording mock transport with a scripted instrument behind it.
//!
//! `MockAdapter` emulates just enough of the SMU's scripting surface for the
//! channel layer to run against it: it tracks the source level written via
//! `smu.source.level = …` assignments and answers `print(...)` queries for
//! the level and for current measurements. Every written command is
//! recorded, so tests can assert exact command traffic (including that a
//! rejected request issued zero commands).

use super::Adapter;
use crate::error::{RampError, RampResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Shared, inspectable state of a [`MockAdapter`].
#[derive(Debug, Default)]
pub struct MockAdapterState {
    /// Every command written, in order.
    pub log: Vec<String>,
    /// The source level as last assigned, in hardware (signed) volts.
    pub level: f64,
    /// Currents to hand out for successive measurement queries. When
    /// exhausted, `default_current` is used.
    pub currents: VecDeque<f64>,
    /// Measurement value returned once `currents` runs dry.
    pub default_current: f64,
    /// Fail the Nth write (0-based) with an I/O error, once.
    pub fail_on_write: Option<usize>,
    /// Next response to return verbatim, overriding emulation. Lets tests
    /// exercise the unparsable-response path.
    pub forced_response: Option<String>,
}

/// In-memory [`Adapter`] emulating one SMU.
pub struct MockAdapter {
    state: Arc<Mutex<MockAdapterState>>,
    pending: Option<String>,
    connected: bool,
    writes_seen: usize,
}

impl MockAdapter {
    /// Create a mock adapter resting at 0 V with a 1 µA default current.
    pub fn new() -> Self {
        let state = MockAdapterState {
            default_current: 1.0e-6,
            ..MockAdapterState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            pending: None,
            connected: true,
            writes_seen: 0,
        }
    }

    /// Handle to the shared state, for inspection and scripting from tests.
    pub fn state(&self) -> Arc<Mutex<MockAdapterState>> {
        Arc::clone(&self.state)
    }

    /// Start the emulated source at the given hardware (signed) level.
    pub fn with_level(self, level: f64) -> Self {
        self.lock().level = level;
        self
    }

    /// Queue currents to return for successive measurement queries.
    pub fn with_currents(self, currents: impl IntoIterator<Item = f64>) -> Self {
        self.lock().currents.extend(currents);
        self
    }

    /// Fail the Nth write (0-based) with an I/O error.
    pub fn fail_on_write(self, nth: usize) -> Self {
        self.lock().fail_on_write = Some(nth);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockAdapterState> {
        // The mutex is only held for short, non-async critical sections, so
        // poisoning can only come from a panicking test.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn respond(&mut self, command: &str) -> Option<String> {
        let mut state = self.lock();
        if let Some(forced) = state.forced_response.take() {
            return Some(forced);
        }
        if let Some(level) = command.strip_prefix("smu.source.level = ") {
            if let Ok(level) = level.trim().parse::<f64>() {
                state.level = level;
            }
            return None;
        }
        match command {
            "print(smu.source.level)" => Some(format!("{}", state.level)),
            "print(smu.measure.read())" => {
                let current = state
                    .currents
                    .pop_front()
                    .unwrap_or(state.default_current);
                Some(format!("{current:e}"))
            }
            _ => None,
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn connect(&mut self) -> RampResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> RampResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn write(&mut self, command: &str) -> RampResult<()> {
        if !self.connected {
            return Err(RampError::NotConnected("mock".into()));
        }
        let nth = self.writes_seen;
        self.writes_seen += 1;
        {
            let mut state = self.lock();
            if state.fail_on_write == Some(nth) {
                state.fail_on_write = None;
                return Err(RampError::Io(std::io::Error::other(
                    "injected write failure",
                )));
            }
            state.log.push(command.to_string());
        }
        if let Some(response) = self.respond(command) {
            // A second response-producing write before the pending read is a
            // protocol violation the mock refuses to paper over.
            if self.pending.is_some() {
                return Err(RampError::Io(std::io::Error::other(
                    "write issued while a response was pending",
                )));
            }
            self.pending = Some(response);
        }
        Ok(())
    }

    async fn read(&mut self) -> RampResult<String> {
        if !self.connected {
            return Err(RampError::NotConnected("mock".into()));
        }
        self.pending.take().ok_or_else(|| {
            RampError::Io(std::io::Error::other("read with no response pending"))
        })
    }

    fn info(&self) -> String {
        "MockAdapter".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_level_assignments_and_answers_queries() {
        let mut adapter = MockAdapter::new();
        adapter.write("smu.source.level = -2.5").await.unwrap();
        adapter.write("print(smu.source.level)").await.unwrap();
        assert_eq!(adapter.read().await.unwrap(), "-2.5");

        let state = adapter.state();
        assert_eq!(state.lock().unwrap().log.len(), 2);
    }

    #[tokio::test]
    async fn scripted_currents_come_back_in_order() {
        let mut adapter = MockAdapter::new().with_currents([1.0e-3, 2.0e-3]);
        adapter.write("print(smu.measure.read())").await.unwrap();
        let first: f64 = adapter.read().await.unwrap().parse().unwrap();
        adapter.write("print(smu.measure.read())").await.unwrap();
        let second: f64 = adapter.read().await.unwrap().parse().unwrap();
        assert_eq!((first, second), (1.0e-3, 2.0e-3));

        // Exhausted queue falls back to the default current.
        adapter.write("print(smu.measure.read())").await.unwrap();
        let third: f64 = adapter.read().await.unwrap().parse().unwrap();
        assert_eq!(third, 1.0e-6);
    }

    #[tokio::test]
    async fn read_without_pending_response_is_an_error() {
        let mut adapter = MockAdapter::new();
        assert!(adapter.read().await.is_err());
    }

    #[tokio::test]
    async fn injected_write_failure_fires_once() {
        let mut adapter = MockAdapter::new().fail_on_write(1);
        adapter.write("smu.source.level = 1").await.unwrap();
        assert!(adapter.write("smu.source.level = 2").await.is_err());
        adapter.write("smu.source.level = 3").await.unwrap();

        // The failed write never reached the log.
        let state = adapter.state();
        let log = state.lock().unwrap().log.clone();
        assert_eq!(log, vec!["smu.source.level = 1", "smu.source.level = 3"]);
    }
}
