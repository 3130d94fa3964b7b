//! Infrastructure adapters and runtime bootstrap.

pub mod cache;
pub mod error;
pub mod http;
pub mod memory;
pub mod telemetry;
