//! Provider process lifecycle for toolgate
//!
//! The process runner spawns and monitors child tool servers; the
//! supervisor orchestrates boot recovery, predefined provider
//! discovery, health sweeps and the admin install flow; the catalog is
//! the local database behind the search-and-install endpoints.

pub mod catalog;
pub mod ports;
pub mod process;
pub mod supervisor;

pub use catalog::{Catalog, CatalogEntry, CatalogMatch};
pub use ports::find_available_port;
pub use process::{InstallConfig, InstallOutcome, ProcessRunner};
pub use supervisor::{BootReport, InstallRequest, Supervisor, SupervisorConfig};
