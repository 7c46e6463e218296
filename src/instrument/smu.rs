//! Channel implementation for Keithley-class SMUs speaking TSP.
//!
//! The instrument runs a Lua-flavored scripting engine: assignments like
//! `smu.source.level = -3.5` produce no output, while `print(...)` calls
//! produce exactly one response line. [`SmuChannel`] formats those
//! statements, enforces the write-then-read pairing, and parses responses
//! as plain decimal numbers.

use super::{InstrumentChannel, RailId};
use crate::adapters::Adapter;
use crate::error::{RampError, RampResult};
use async_trait::async_trait;
use tracing::debug;

/// One TSP-speaking source-measure unit, bound to a rail.
pub struct SmuChannel<A: Adapter> {
    id: String,
    rail: RailId,
    adapter: A,
}

impl<A: Adapter> SmuChannel<A> {
    /// Bind an adapter to a rail. The channel applies the rail's hardware
    /// polarity on every write and read-back.
    pub fn new(id: impl Into<String>, rail: RailId, adapter: A) -> Self {
        Self {
            id: id.into(),
            rail,
            adapter,
        }
    }

    /// Send one output-producing statement and parse its response as `f64`.
    async fn query_f64(&mut self, command: &str) -> RampResult<f64> {
        self.adapter.write(command).await?;
        let response = self.adapter.read().await?;
        response.trim().parse::<f64>().map_err(|_| RampError::Parse {
            channel: self.id.clone(),
            response,
        })
    }
}

#[async_trait]
impl<A: Adapter> InstrumentChannel for SmuChannel<A> {
    fn id(&self) -> &str {
        &self.id
    }

    fn rail(&self) -> RailId {
        self.rail
    }

    async fn set_level(&mut self, volts: f64) -> RampResult<()> {
        let hardware = self.rail.to_hardware(volts);
        debug!(channel = %self.id, level = hardware, "set source level");
        self.adapter
            .write(&format!("smu.source.level = {hardware}"))
            .await
    }

    async fn read_set_level(&mut self) -> RampResult<f64> {
        let hardware = self.query_f64("print(smu.source.level)").await?;
        Ok(self.rail.from_hardware(hardware))
    }

    async fn read_measurement(&mut self) -> RampResult<f64> {
        self.query_f64("print(smu.measure.read())").await
    }
}
