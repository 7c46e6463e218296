//! Transport adapter implementations.
//!
//! This module contains implementations of the [`Adapter`] trait, providing
//! low-level I/O abstraction over the ASCII request/response link to a
//! source-measure unit.
//!
//! The protocol is strictly paired: a statement that produces output (a
//! `print(...)` call in the instrument's scripting language) must be followed
//! by exactly one [`Adapter::read`] before the next response-producing write.
//! Statements without output need no read. Adapters do not interpret
//! commands; pairing is the caller's responsibility and the mock adapter
//! enforces it in tests.

pub mod mock;
pub mod visa;

pub use mock::MockAdapter;
pub use visa::VisaAdapter;

use crate::error::RampResult;
use async_trait::async_trait;

/// Low-level bidirectional ASCII transport to one instrument.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Establish the hardware link.
    async fn connect(&mut self) -> RampResult<()>;

    /// Release the hardware link. Idempotent.
    async fn disconnect(&mut self) -> RampResult<()>;

    /// True while the link is usable.
    fn is_connected(&self) -> bool;

    /// Send one command line. The terminator is appended by the adapter.
    async fn write(&mut self, command: &str) -> RampResult<()>;

    /// Read one pending response line, trimmed.
    async fn read(&mut self) -> RampResult<String>;

    /// Human-readable adapter description for logs.
    fn info(&self) -> String;
}
