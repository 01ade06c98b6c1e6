//! Logging utilities.
//!
//! The engine only emits through the `log` facade. This module offers a
//! one-call `env_logger` setup for binaries and tools.

mod init;

pub use init::{init_logging, LoggingConfig};
