pub mod config;
pub mod metrics;
pub mod service;
pub mod shutdown;
pub mod telemetry;
