//! Core domain + application logic for streamwatch.
//!
//! This crate is framework-agnostic. Discord, the streaming platforms and the
//! HTTP server live behind ports (traits) implemented in adapter crates.

pub mod announce;
pub mod bounded;
pub mod config;
pub mod defaults;
pub mod domain;
pub mod errors;
pub mod eventsub;
pub mod locks;
pub mod logging;
pub mod outcome;
pub mod polling;
pub mod ports;
pub mod reconciler;
pub mod registry;
pub mod roles;
pub mod service;
pub mod store;
pub mod subscriptions;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
