//! Session lifecycle for the Portico gateway.
//!
//! One session per connected client, one owned transport per session, at
//! most one push channel per session. The pieces compose in one direction:
//! the [`SessionRegistry`] and [`ChannelMap`] are plain storage, the
//! [`KeepAliveScheduler`] and [`SessionReaper`] keep that storage honest
//! over time, the [`AdmissionController`] bounds it, and the [`Dispatcher`]
//! is the only entry point request handlers ever talk to.

pub mod admission;
pub mod channel;
pub mod dispatch;
pub mod keepalive;
pub mod lifecycle;
pub mod lock;
pub mod store;
pub mod transport;

pub use admission::AdmissionController;
pub use channel::{ChannelMap, PushChannel, PushFrame};
pub use dispatch::{ChannelSummary, DiagnosticsReport, Dispatcher, SessionSummary};
pub use keepalive::KeepAliveScheduler;
pub use lifecycle::{teardown, ReapStats, SessionReaper, TeardownReason};
pub use lock::SessionLockMap;
pub use store::{Session, SessionRegistry, SessionState};
pub use transport::{CallTransport, LoopbackFactory, LoopbackTransport, TransportFactory};
