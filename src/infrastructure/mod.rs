//! Infrastructure layer: adapters for config loading, logging, and other
//! cross-cutting concerns. Framework/IO-touching code lives here; domain
//! and service logic stays free of it.

pub mod config;
pub mod logging;
