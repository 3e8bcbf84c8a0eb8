//! Session fabric: per-connection registry, message validation, routing,
//! fan-out, and heartbeat liveness (§4.7).

pub mod fabric;
pub mod registry;

pub use fabric::SessionFabric;
pub use registry::{Session, SessionRegistry};
