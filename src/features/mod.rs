//! Module: features
//!
//! Purpose: Build-time feature composition.
//!
//! Architecture:
//! - Cargo features + SENSORNET_* environment variables: raw flags
//! - resolve.rs: declarative rule table and the pure resolver
//! - build.rs: runs the resolver, fails the build on a conflict and
//!   generates capabilities.rs with the resolved set
//!
//! The resolved set is a `const`, so every `BUILD.has(..)` check folds away.

mod resolve;

pub use resolve::*;

mod generated {
    use super::*;

    include!(concat!(env!("OUT_DIR"), "/capabilities.rs"));
}

pub use generated::{BAUD_RATE, BUILD, SERIAL_OUTPUT_SIZE};
