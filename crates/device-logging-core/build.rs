/// Builds the gRPC client and server code for `device/v1/device.proto` using
/// `tonic-prost-build`.
///
/// Alongside the generated modules, a serialized `FileDescriptorSet` is written
/// to `OUT_DIR/device_descriptor.bin` so the server can expose gRPC
/// reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/device/v1/device.proto`
/// - Includes: `proto/`
///
/// # Output
///
/// Generated code is available via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("device.v1");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("device_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure().compile_with_config(
        config,
        &["proto/device/v1/device.proto"],
        &["proto"],
    )?;

    println!("cargo:rerun-if-changed=proto/device/v1/device.proto");
    Ok(())
}
