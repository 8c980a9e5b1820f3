//! Shared domain types for netd: configuration model, NETCONF capability
//! URIs and negotiation, and the descriptor structs exchanged with native
//! backends.
//!
//! This crate sits at the bottom of the workspace; it must not depend on
//! any other netd crate.

pub mod capability;
pub mod config;
pub mod descriptor;

pub use capability::{urns, CapabilitySet, Negotiated};
pub use config::{Config, ConfigError};
