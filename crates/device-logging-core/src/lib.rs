#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

pub mod device;
pub mod metrics;
pub mod store;
