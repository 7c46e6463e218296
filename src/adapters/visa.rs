//! VISA transport adapter for TCPIP/USB/GPIB instruments.
//!
//! Provides an [`Adapter`] implementation over the `visa-rs` crate,
//! supporting resource strings like:
//! - `TCPIP0::169.254.91.2::inst0::INSTR` (Ethernet/LXI)
//! - `USB0::0x05E6::0x2470::SERIAL::INSTR` (USB)
//! - `GPIB0::18::INSTR` (GPIB)
//!
//! VISA I/O is synchronous; all calls are executed on Tokio's blocking
//! thread pool so the runtime never stalls on the instrument.
//!
//! Built without the `instrument_visa` feature, construction still works but
//! `connect` reports [`RampError::VisaFeatureDisabled`], so callers can keep
//! a single code path and let the mock stack take over in tests.

use super::Adapter;
use crate::error::{RampError, RampResult};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use std::ffi::CString;
#[cfg(feature = "instrument_visa")]
use std::io::{Read, Write};
#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// VISA adapter for one instrument resource.
pub struct VisaAdapter {
    resource_string: String,
    timeout: Duration,
    line_terminator: String,
    #[cfg(feature = "instrument_visa")]
    session: Option<Arc<Mutex<visa_rs::Instrument>>>,
    #[cfg(feature = "instrument_visa")]
    resource_manager: Option<DefaultRM>,
}

impl VisaAdapter {
    /// Create a new VISA adapter with default settings (5 s timeout, `\n`
    /// terminator). No connection is attempted until [`Adapter::connect`].
    pub fn new(resource_string: impl Into<String>) -> Self {
        Self {
            resource_string: resource_string.into(),
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            #[cfg(feature = "instrument_visa")]
            session: None,
            #[cfg(feature = "instrument_visa")]
            resource_manager: None,
        }
    }

    /// Set the read/write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the command line terminator.
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// The configured resource string.
    pub fn resource_string(&self) -> &str {
        &self.resource_string
    }
}

#[async_trait]
impl Adapter for VisaAdapter {
    async fn connect(&mut self) -> RampResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            let resource = self.resource_string.clone();
            let timeout = self.timeout;

            let (rm, session) = tokio::task::spawn_blocking(move || {
                let rm = DefaultRM::new().map_err(|e| {
                    RampError::Io(std::io::Error::other(format!(
                        "failed to create VISA resource manager: {e}"
                    )))
                })?;
                let c_string = CString::new(resource.clone()).map_err(|e| {
                    RampError::Configuration(format!(
                        "resource string '{resource}' is not a valid VISA name: {e}"
                    ))
                })?;
                let visa_string = visa_rs::VisaString::from(c_string);
                let session = rm
                    .open(&visa_string, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
                    .map_err(|e| {
                        RampError::Io(std::io::Error::other(format!(
                            "failed to open VISA resource '{resource}': {e}"
                        )))
                    })?;
                Ok::<_, RampError>((rm, session))
            })
            .await
            .map_err(|e| RampError::Io(std::io::Error::other(format!("VISA open task: {e}"))))??;

            self.resource_manager = Some(rm);
            self.session = Some(Arc::new(Mutex::new(session)));
            debug!(
                resource = %self.resource_string,
                timeout_ms = timeout.as_millis() as u64,
                "VISA resource opened"
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_visa"))]
        Err(RampError::VisaFeatureDisabled)
    }

    async fn disconnect(&mut self) -> RampResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            if self.session.take().is_some() {
                self.resource_manager = None;
                debug!(resource = %self.resource_string, "VISA resource closed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_visa")]
        {
            self.session.is_some()
        }

        #[cfg(not(feature = "instrument_visa"))]
        false
    }

    async fn write(&mut self, command: &str) -> RampResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| RampError::NotConnected(self.resource_string.clone()))?
                .clone();
            let line = format!("{}{}", command, self.line_terminator);
            let command_for_log = command.to_string();

            tokio::task::spawn_blocking(move || {
                let mut guard = session.blocking_lock();
                guard.write_all(line.as_bytes()).map_err(RampError::Io)
            })
            .await
            .map_err(|e| RampError::Io(std::io::Error::other(format!("VISA write task: {e}"))))??;

            debug!(command = %command_for_log, "VISA write");
            Ok(())
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            let _ = command;
            Err(RampError::VisaFeatureDisabled)
        }
    }

    async fn read(&mut self) -> RampResult<String> {
        #[cfg(feature = "instrument_visa")]
        {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| RampError::NotConnected(self.resource_string.clone()))?
                .clone();

            let response = tokio::task::spawn_blocking(move || {
                let mut guard = session.blocking_lock();
                let mut buf = [0u8; 1024];
                let bytes_read = guard.read(&mut buf).map_err(RampError::Io)?;
                Ok::<_, RampError>(String::from_utf8_lossy(&buf[..bytes_read]).trim().to_string())
            })
            .await
            .map_err(|e| RampError::Io(std::io::Error::other(format!("VISA read task: {e}"))))??;

            debug!(response = %response, "VISA read");
            Ok(response)
        }

        #[cfg(not(feature = "instrument_visa"))]
        Err(RampError::VisaFeatureDisabled)
    }

    fn info(&self) -> String {
        format!(
            "VisaAdapter({} @ {}ms timeout)",
            self.resource_string,
            self.timeout.as_millis()
        )
    }
}
