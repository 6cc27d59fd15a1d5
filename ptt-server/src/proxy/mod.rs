//! Mounts module routes on the host router and carries requests, responses
//! and event streams across the process boundary.

mod handler;
pub mod marshal;
pub mod relay;
pub mod sse;

pub use handler::plugin_routes;
pub use relay::{RelayEnd, spawn_relay};
pub use sse::SseEvent;
