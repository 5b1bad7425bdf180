//! Hitlab Server Library
//!
//! Popularity scoring and market-driven generation of audio-feature profiles,
//! served over a JSON API. The modules are exposed for the binaries and for
//! integration tests.

pub mod agent;
pub mod assistant;
pub mod config;
pub mod explain;
pub mod features;
pub mod generator;
pub mod market;
pub mod model;
pub mod server;
pub mod studio;

// Re-export commonly used types for convenience
pub use server::{run_server, RequestsLoggingLevel};
pub use studio::{GenerateRequest, Generation, Prediction, Studio, StudioError};
