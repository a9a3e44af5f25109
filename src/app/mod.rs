//! Application core: domain logic behind port traits.
//!
//! This module contains the business rules of the sensor node: the
//! measurement loop that drives the FSM, its outbound events and the
//! console commands.  All interaction with hardware happens through
//! **port traits** defined in [`ports`], keeping this layer fully
//! testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
