//! Sensor node firmware core library.
//!
//! Exposes the measurement loop, its drivers and codecs for the host
//! binary and for integration testing.  Everything that touches hardware
//! sits behind the port traits in [`app::ports`]; the host
//! implementations live in [`adapters`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod codec;
pub mod config;
pub mod error;
pub mod fsm;
pub mod measurement;
pub mod provisioning;
pub mod scheduler;
pub mod sdlog;
pub mod sensors;
pub mod timer;
pub mod update;
