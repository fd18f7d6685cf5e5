//! gRPC service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`DeviceService`).
//! - [`samples`] - fixed device listing returned by `GetDevices`.

pub mod handler;
pub mod samples;
#[cfg(test)]
pub(crate) mod testing;
