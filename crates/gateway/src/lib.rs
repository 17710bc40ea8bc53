//! Portico gateway — HTTP surface, CLI, and runtime wiring.
//!
//! The interesting lifecycle logic lives in `portico-sessions`; this crate
//! binds it to the outside world: the `/mcp` endpoint, the operational
//! `/v1` routes, configuration loading, and the background loops.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod rpc;
pub mod state;
