//! Generated protobuf messages and gRPC bindings for `device.v1`.

#![allow(clippy::all, clippy::pedantic, missing_docs)]

tonic::include_proto!("device.v1");

/// Encoded `FileDescriptorSet` for the `device.v1` package, used to serve
/// gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("device_descriptor");
