//! Build Script for Candle Stream
//!
//! The gRPC stubs under `src/infrastructure/grpc/proto/` are checked in so a
//! plain build needs no `protoc`. Enable the `codegen` feature to regenerate
//! them from `proto/candles/v1/candles.proto`.
//!
//! # Panics Policy
//!
//! Build scripts halt the build with a descriptive panic when a
//! prerequisite is missing; there is no caller to propagate errors to.
#![allow(clippy::expect_used)]

use std::env;

fn main() {
    // Rerun build script if it changes
    println!("cargo:rerun-if-changed=build.rs");

    // Rerun if proto files change
    println!("cargo:rerun-if-changed=proto/candles/v1/candles.proto");

    // Emit cfg for coverage detection
    if env::var("CARGO_LLVM_COV").is_ok()
        || env::var("LLVM_PROFILE_FILE").is_ok()
        || env::var("RUSTFLAGS")
            .map(|f| f.contains("instrument-coverage"))
            .unwrap_or(false)
    {
        println!("cargo:rustc-cfg=coverage");
    }

    #[cfg(feature = "codegen")]
    generate_stubs();
}

#[cfg(feature = "codegen")]
fn generate_stubs() {
    tonic_prost_build::configure()
        .build_client(true) // Enable client for integration tests
        .build_server(true)
        .out_dir("src/infrastructure/grpc/proto")
        .compile_protos(&["proto/candles/v1/candles.proto"], &["proto"])
        .expect("Failed to compile protobuf definitions; is protoc installed?");
}
