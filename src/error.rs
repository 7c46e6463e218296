//! Custom error types for the application.
//!
//! This module defines the primary error type, `RampError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes a ramp can hit:
//!
//! - **`Config` / `Configuration`**: file/env parsing failures and semantic
//!   configuration errors caught during validation (e.g. a non-positive
//!   default step size).
//! - **`Io`**: transport-level I/O failures from the adapter layer.
//! - **`Parse`**: the instrument answered, but the response did not parse as
//!   a decimal number. Treated as a transport failure, never retried.
//! - **`Contract`**: the caller violated an API precondition (step ≤ 0,
//!   non-finite voltages). Raised before any instrument command is issued.
//! - **`Aborted`**: an in-progress ramp died mid-plan. Carries the last
//!   set-point that was successfully applied, because the instrument is
//!   resting there, not at the ramp's start.
//!
//! Policy rejections are deliberately NOT errors: a rejected request is a
//! normal outcome (`RampOutcome::Rejected`) and leaves the hardware
//! untouched.

use crate::instrument::RailId;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type RampResult<T> = std::result::Result<T, RampError>;

/// Failure classes surfaced by the ramp controller and its collaborators.
#[derive(Error, Debug)]
pub enum RampError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument '{channel}' returned an unparsable response: '{response}'")]
    Parse { channel: String, response: String },

    #[error("Instrument channel '{0}' is not connected")]
    NotConnected(String),

    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Ramp aborted on rail '{rail}'; instrument rests at the last applied set-point: {source}")]
    Aborted {
        rail: RailId,
        /// Last set-point successfully written before the failure, in
        /// user-facing magnitude volts. `None` if the very first write failed.
        last_applied: Option<f64>,
        #[source]
        source: Box<RampError>,
    },

    #[error("VISA support not enabled. Rebuild with --features instrument_visa")]
    VisaFeatureDisabled,
}

impl RampError {
    /// The voltage the rail was left at when a ramp aborted, if known.
    pub fn resting_level(&self) -> Option<f64> {
        match self {
            RampError::Aborted { last_applied, .. } => *last_applied,
            _ => None,
        }
    }
}
