//! # sensornet
//!
//! Hardware boundary of a sensor network node.
//!
//! ## Architecture
//!
//! - [`features`]: capability flags resolved at build time into one
//!   immutable [`features::BUILD`] set; conflicts fail the build
//! - [`hal`]: the [`hal::Hal`] contract and one backend per target
//! - [`config`]: persistent, byte-addressable config store
//! - [`logging`]: bounded debug sink used by `Hal::debug_print`
//! - [`runtime`]: `init` once, then `process` + user loop forever
//!
//! The HAL backend is a plain value handed to [`runtime::Firmware`]; there
//! is no global instance.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod features;
pub mod hal;
pub mod logging;
pub mod runtime;

pub use config::{ConfigStore, StoreError};
pub use features::BUILD;
pub use hal::{Hal, InitError, SleepOutcome, UniqueId};
pub use runtime::{Core, Firmware, Sketch};

/// Firmware version banner, e.g. `sensornet v0.1.0-g1a2b3c4`.
pub const VERSION_STRING: &str = env!("VERSION_STRING");
