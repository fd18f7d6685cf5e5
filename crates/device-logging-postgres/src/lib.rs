#![doc = include_str!("../README.md")]

mod client;
mod config;
mod device_store;
mod schema;

pub use client::PostgresClient;
pub use config::PostgresConfig;
pub use device_store::{BACKEND, PostgresDeviceStore};
pub use schema::{CREATE_GRPC_DEVICE, ensure_schema};
