//! Panelsync Relay Daemon
//!
//! Network front end for [`panelsync_core::Relay`]: a WebSocket endpoint
//! for primary and remote clients, a health probe and an optional static
//! file service for browser surfaces.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod server;

pub use server::{HealthReport, RelayServer};
