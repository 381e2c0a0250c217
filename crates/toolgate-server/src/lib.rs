//! Network surfaces of the gateway
//!
//! - `control`: the provider-facing WebSocket control plane
//! - `admin`: the operator-facing HTTP API
//! - `events_ws`: the real-time change-stream WebSocket
//! - `fanout`: multiplexing of registry events to clients and the bus
//! - `state`: shared state wired through both routers

pub mod admin;
pub mod control;
pub mod events_ws;
pub mod fanout;
pub mod state;

pub use control::{control_router, serve_control_plane, ActionHandler, ServerRole};
pub use fanout::FanOut;
pub use state::AppState;
