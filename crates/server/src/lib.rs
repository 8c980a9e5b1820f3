//! netd server library: datastores, dispatcher, session plumbing.
//!
//! The `netd` binary wires this together from the TOML config; tests
//! drive the same entry points over in-memory stores and test sockets.

pub mod backend;
pub mod dispatch;
pub mod serve;
pub mod sessions;
pub mod startup;
pub mod state;
pub mod store;
