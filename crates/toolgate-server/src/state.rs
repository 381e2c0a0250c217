//! Shared state for the network surfaces

use std::sync::Arc;
use std::time::Instant;

use toolgate_dispatch::ToolGateway;
use toolgate_runner::{Catalog, Supervisor};

use crate::control::ServerRole;
use crate::fanout::FanOut;

/// State shared by the control plane and the admin API
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ToolGateway>,
    pub supervisor: Arc<Supervisor>,
    pub catalog: Arc<Catalog>,
    pub fanout: Arc<FanOut>,
    pub role: ServerRole,
    /// Shared admin token; None disables the guard
    pub admin_token: Option<String>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        gateway: Arc<ToolGateway>,
        supervisor: Arc<Supervisor>,
        catalog: Arc<Catalog>,
        fanout: Arc<FanOut>,
        role: ServerRole,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            gateway,
            supervisor,
            catalog,
            fanout,
            role,
            admin_token,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
