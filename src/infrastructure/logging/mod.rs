//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON/pretty log formatting
//! - Optional rolling file output
//! - Secret scrubbing

mod config;
mod logger;
mod secret_scrubbing;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
pub use secret_scrubbing::SecretScrubbingLayer;
