//! ---
//! bmq_section: "01-core-functionality"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Crate root re-exporting session configuration and tracing setup."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Shared primitives for the bmq-bridge workspace.
//! This crate exposes session configuration loading and tracing
//! initialisation consumed by the core and the mock harness.

pub mod config;
pub mod logging;

pub use config::{CompressionAlgorithm, LoggingConfig, SessionConfig, Timeouts};
pub use logging::{init_tracing, LogFormat};
