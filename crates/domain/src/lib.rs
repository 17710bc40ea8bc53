//! Shared domain types for Portico.
//!
//! Holds everything the other crates agree on: the configuration tree, the
//! error taxonomy, structured trace events, and the JSON-RPC envelope types
//! spoken on the wire.

pub mod config;
pub mod error;
pub mod rpc;
pub mod trace;

pub use config::Config;
pub use error::{Error, Result};
