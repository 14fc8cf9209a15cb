//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod options;
pub mod telemetry;
