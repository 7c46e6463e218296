//! Application configuration, loaded with Figment.
//!
//! Configuration is layered from:
//! 1. built-in defaults,
//! 2. a TOML file (`config/default.toml` unless a path is given),
//! 3. environment variables prefixed with `SMU_RAMP_`.
//!
//! Nested keys use a double underscore in the environment, e.g.:
//!
//! ```text
//! SMU_RAMP_RAMP__STEP=0.25
//! SMU_RAMP_RAMP__VARIANT=W2R17
//! SMU_RAMP_INSTRUMENTS__HV_RESOURCE="TCPIP0::10.0.0.7::inst0::INSTR"
//! ```

use crate::error::{RampError, RampResult};
use crate::policy::DutVariant;
use crate::session::{DEFAULT_STEP_DELAY, DEFAULT_STEP_VOLTS};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "SMU_RAMP_";

/// Top-level application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application-level settings.
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Per-rail instrument endpoints.
    #[serde(default)]
    pub instruments: InstrumentSettings,
    /// Ramp parameter defaults.
    #[serde(default)]
    pub ramp: RampSettings,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name, used in log output.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// VISA endpoints for the three rail instruments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// HV rail resource string.
    #[serde(default = "default_hv_resource")]
    pub hv_resource: String,
    /// pwell rail resource string.
    #[serde(default = "default_pwell_resource")]
    pub pwell_resource: String,
    /// psub rail resource string.
    #[serde(default = "default_psub_resource")]
    pub psub_resource: String,
    /// Read/write timeout for instrument I/O.
    #[serde(with = "humantime_serde", default = "default_io_timeout")]
    pub io_timeout: Duration,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            hv_resource: default_hv_resource(),
            pwell_resource: default_pwell_resource(),
            psub_resource: default_psub_resource(),
            io_timeout: default_io_timeout(),
        }
    }
}

/// Defaults for request-scoped ramp parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampSettings {
    /// Voltage increment between steps, volts.
    #[serde(default = "default_step")]
    pub step: f64,
    /// Settle time between applying a set-point and sampling current.
    #[serde(with = "humantime_serde", default = "default_delay")]
    pub delay: Duration,
    /// Chip under test.
    #[serde(default)]
    pub variant: DutVariant,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            step: default_step(),
            delay: default_delay(),
            variant: DutVariant::default(),
        }
    }
}

fn default_app_name() -> String {
    "smu_ramp".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_hv_resource() -> String {
    "TCPIP0::169.254.91.3::inst0::INSTR".to_string()
}

fn default_pwell_resource() -> String {
    "TCPIP0::169.254.91.2::inst0::INSTR".to_string()
}

fn default_psub_resource() -> String {
    "TCPIP0::169.254.91.1::inst0::INSTR".to_string()
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_step() -> f64 {
    DEFAULT_STEP_VOLTS
}

fn default_delay() -> Duration {
    DEFAULT_STEP_DELAY
}

impl Settings {
    /// Load settings from file and environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    pub fn load(path: Option<&Path>) -> RampResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let settings: Settings = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks that parsing cannot catch.
    pub fn validate(&self) -> RampResult<()> {
        if !self.ramp.step.is_finite() || self.ramp.step <= 0.0 {
            return Err(RampError::Configuration(format!(
                "ramp.step must be a positive voltage, got {}",
                self.ramp.step
            )));
        }
        for (name, resource) in [
            ("instruments.hv_resource", &self.instruments.hv_resource),
            ("instruments.pwell_resource", &self.instruments.pwell_resource),
            ("instruments.psub_resource", &self.instruments.psub_resource),
        ] {
            if resource.trim().is_empty() {
                return Err(RampError::Configuration(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }
}
