//! Environment and gateway configuration
//!
//! Environment variables are loaded from the canonical location
//! `/etc/toolgate/environment` so all components share one
//! configuration. Presence of a variable in the process environment
//! always wins over config-file values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/toolgate/environment";

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/toolgate/environment", "/etc/toolgate.env", ".env"];

/// Load environment variables from the canonical configuration file.
///
/// 1. Checks `TOOLGATE_ENV_FILE` for a custom path
/// 2. Falls back through [`ENV_FILE_PATHS`]
/// 3. Does NOT override existing environment variables
///
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("TOOLGATE_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

/// Try to load an environment file from the given path.
fn try_load_env_file(path: &str) -> Option<String> {
    let path_ref = Path::new(path);
    if !path_ref.exists() {
        return None;
    }

    match fs::read_to_string(path_ref) {
        Ok(contents) => {
            let mut loaded = 0;
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                        loaded += 1;
                    }
                }
            }
            info!(path = %path, loaded, "Loaded environment file");
            Some(path.to_string())
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Failed to read environment file");
            None
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host both servers bind to
    pub bind_host: String,
    /// Control-plane WebSocket port
    pub control_port: u16,
    /// Admin HTTP port
    pub admin_port: u16,
    /// Port range scanned for spawned providers
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Deadline for one dispatch call
    pub dispatch_timeout: Duration,
    /// Deadline for a registration exchange
    pub registration_timeout: Duration,
    /// Deadline for a reachability probe
    pub probe_timeout: Duration,
    /// Interval between health sweeps over remote providers
    pub health_sweep_interval: Duration,
    /// Redis URL for the shared event bus; None disables bus publication
    pub redis_url: Option<String>,
    /// Path of the persisted provider manifest
    pub manifest_path: PathBuf,
    /// Shared admin token; None disables the admin guard
    pub admin_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            control_port: 8080,
            admin_port: 8090,
            port_range_start: 8100,
            port_range_end: 8200,
            dispatch_timeout: Duration::from_secs(120),
            registration_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            health_sweep_interval: Duration::from_secs(30),
            redis_url: None,
            manifest_path: PathBuf::from("/var/lib/toolgate/providers.json"),
            admin_token: None,
        }
    }
}

impl GatewayConfig {
    /// Build a config from defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("TOOLGATE_BIND_HOST") {
            config.bind_host = host;
        }
        if let Some(port) = env_u16("TOOLGATE_CONTROL_PORT") {
            config.control_port = port;
        }
        if let Some(port) = env_u16("TOOLGATE_ADMIN_PORT") {
            config.admin_port = port;
        }
        if let Some(port) = env_u16("TOOLGATE_PORT_RANGE_START") {
            config.port_range_start = port;
        }
        if let Some(port) = env_u16("TOOLGATE_PORT_RANGE_END") {
            config.port_range_end = port;
        }
        if let Some(secs) = env_u64("TOOLGATE_DISPATCH_TIMEOUT_SECS") {
            config.dispatch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TOOLGATE_SWEEP_SECS") {
            config.health_sweep_interval = Duration::from_secs(secs);
        }
        if let Ok(url) = std::env::var("TOOLGATE_REDIS_URL") {
            if !url.is_empty() {
                config.redis_url = Some(url);
            }
        }
        if let Ok(path) = std::env::var("TOOLGATE_MANIFEST_PATH") {
            config.manifest_path = PathBuf::from(path);
        }
        if let Ok(token) = std::env::var("TOOLGATE_ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        config
    }

    /// Address the control-plane WebSocket listens on.
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.control_port)
    }

    /// Address the admin HTTP server listens on.
    pub fn admin_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.admin_port)
    }
}

fn env_u16(key: &str) -> Option<u16> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
