//! Stevedore core - shared error taxonomy and run configuration.
//!
//! Everything here is consumed by both the mirror engine and the CLI;
//! it carries no registry or filesystem logic of its own.

pub mod config;
pub mod error;

pub use config::{clamp_workers, CommonConfig, MAX_WORKER_NUM, MIN_WORKER_NUM};
pub use error::{MirrorError, Result};

/// Stevedore version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
