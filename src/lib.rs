//! Clawgate - health-check front door for a loopback gateway process
//!
//! This library provides:
//! - Probe routing: `/health` and `/` are answered locally
//! - A reverse proxy that streams every other request to the gateway on loopback
//! - A supervisor that spawns the gateway and ties the front door's lifetime to it
//! - A one-shot CLI runner and the small JSON API wrapped around it

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod proxy;
pub mod router;
pub mod shutdown;
pub mod upstream;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
