//! Persistence and pub/sub plumbing for toolgate
//!
//! Two concerns live here:
//!
//! - the provider manifest, a single JSON file that lets the gateway
//!   resurrect providers after a restart
//! - the shared event bus, an optional Redis channel mirroring registry
//!   changes to out-of-process subscribers

pub mod bus;
pub mod error;
pub mod manifest;

pub use bus::{try_connect_bus, EventBus, LocalBus, RedisEventBus, TOOL_EVENTS_CHANNEL};
pub use error::{Result, StoreError};
pub use manifest::ManifestStore;
