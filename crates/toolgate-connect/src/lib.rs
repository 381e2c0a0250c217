//! Connection pool for remote tool providers
//!
//! Every registered remote server owns exactly one logical connection.
//! Calls through a connector serialize (one outstanding request at a
//! time), replies are matched by correlation id, and a dead connection
//! is transparently reopened once per call before an error surfaces.

pub mod connector;
pub mod pool;
pub mod probe;

pub use connector::{Connector, ConnectorInfo, ConnectorState};
pub use pool::ConnectorPool;
pub use probe::ping;
