#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! In-process implementation of the strand engine boundary.
//!
//! [`MemoryEngine`] holds configuration objects, partition logs and a
//! consumer-group coordinator. It is what the client crate is tested
//! against and what the benchmark binary drives.

mod cluster;
mod conf;
mod engine;
mod fault;
mod group;
mod props;

pub use engine::MemoryEngine;
pub use fault::{FaultInjector, FaultType};
