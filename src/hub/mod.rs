//! Connection tracking and message fan-out.
//!
//! The hub is the transport-free core of the relay: a [`ConnectionRegistry`]
//! of live connections, a [`Broadcaster`] that accepts messages onto a
//! bounded intake queue, and the [`FanoutTask`] that delivers each queued
//! message to every other registered connection.

mod broadcaster;
mod registry;
mod types;

pub use broadcaster::{Broadcaster, FanoutTask, HubStats, HubStatsSnapshot};
pub use registry::{ConnectionRegistry, RegistryStats};
pub use types::{ConnectionHandle, Envelope, ForwardError, Payload};
