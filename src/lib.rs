//! Coordinated multi-rail bias ramp control for source-measure units.
//!
//! This library drives the three bias rails of a monolithic pixel test
//! device (a high-voltage rail and the coupled pwell/psub DC pair) safely
//! between voltage set-points. Targets are validated against a per-chip
//! safety-interlock table before any instrument command is issued, rails
//! move in small steps with a settle delay and a current sample at every
//! step, and the cross-rail ordering never transits a combination of
//! voltages outside the device's safe-operating table.
//!
//! The entry point is [`session::BiasSession`]: it owns one
//! [`instrument::InstrumentChannel`] per rail and executes one
//! [`session::RampRequest`] at a time.

pub mod adapters;
pub mod config;
pub mod error;
pub mod instrument;
pub mod plan;
pub mod policy;
pub mod ramper;
pub mod session;
pub mod telemetry;
