/// Builds the gRPC client and server code for `analytics.proto` using
/// `tonic-prost-build`.
///
/// The schema declares no protobuf package, so the generated module is written
/// to `OUT_DIR/_.rs` and the fully-qualified service name is
/// `AnalyticsService`. This keeps the server wire-compatible with the load
/// generator and the other benchmark implementations.
///
/// # Files and Paths
///
/// - Proto file: `proto/analytics.proto`
/// - Includes: `proto/`
/// - Descriptor set: `OUT_DIR/analytics_descriptor.bin` (used by reflection)
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// Generated code will be accessible in Rust via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("_");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("analytics_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/analytics.proto"], &["proto"])
        .unwrap();
}
