//! Lifecycle supervisor
//!
//! Orchestrates provider discovery at boot (persisted manifest plus the
//! predefined table), the periodic health sweep, admin-triggered
//! installs and the shutdown drain. The supervisor never owns process
//! or registry state itself; it drives the runner, gateway and manifest
//! in the order their invariants require.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use toolgate_connect::probe;
use toolgate_core::{
    Capability, Error, ParamSchema, ParamType, PersistedProvider, Provenance, Result,
    ToolDescriptor, ToolKind,
};
use toolgate_dispatch::ToolGateway;
use toolgate_registry::{RegisterOutcome, RegistryFilter};
use toolgate_store::ManifestStore;

use crate::process::{InstallConfig, InstallOutcome, ProcessRunner};

/// Supervisor timing knobs
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub probe_timeout: Duration,
    pub registration_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            registration_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// What boot recovery accomplished
#[derive(Debug, Clone, Default)]
pub struct BootReport {
    pub restored_external: usize,
    pub restored_spawned: usize,
    pub predefined_registered: usize,
    pub skipped: usize,
}

/// Admin-facing install request
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub registry_id: String,
    pub display_name: String,
    pub description: String,
    pub command: Vec<String>,
    pub port: Option<u16>,
    pub capabilities: Vec<Capability>,
    pub tags: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Lifecycle orchestrator for providers
pub struct Supervisor {
    gateway: Arc<ToolGateway>,
    runner: Arc<ProcessRunner>,
    manifest: Arc<ManifestStore>,
    config: SupervisorConfig,
    cancel: CancellationToken,
    /// registry_id -> process handle, for providers we spawned
    spawned_handles: RwLock<HashMap<String, u64>>,
}

impl Supervisor {
    pub fn new(
        gateway: Arc<ToolGateway>,
        runner: Arc<ProcessRunner>,
        manifest: Arc<ManifestStore>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            gateway,
            runner,
            manifest,
            config,
            cancel: CancellationToken::new(),
            spawned_handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn runner(&self) -> &Arc<ProcessRunner> {
        &self.runner
    }

    pub fn manifest(&self) -> &Arc<ManifestStore> {
        &self.manifest
    }

    /// Boot recovery: manifest first, then the predefined table.
    pub async fn bootstrap(&self) -> BootReport {
        let mut report = BootReport::default();

        for record in self.manifest.all().await {
            match record.provenance {
                Provenance::External => {
                    if self.restore_external(&record).await {
                        report.restored_external += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                Provenance::Spawned => {
                    if self.restore_spawned(&record).await {
                        report.restored_spawned += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                Provenance::Predefined => {
                    // Predefined providers are never persisted; stale
                    // records are ignored.
                    report.skipped += 1;
                }
            }
        }

        for descriptor in predefined_providers() {
            let endpoint = descriptor.endpoint.clone().unwrap_or_default();
            if probe::ping(&endpoint, self.config.probe_timeout).await {
                match self.gateway.register_remote_server(descriptor).await {
                    Ok(_) => report.predefined_registered += 1,
                    Err(e) => {
                        warn!(error = %e, "Predefined provider registration failed");
                        report.skipped += 1;
                    }
                }
            } else {
                // Comes online later; not an error.
                debug!(endpoint = %endpoint, "Predefined provider not reachable, skipping");
                report.skipped += 1;
            }
        }

        info!(
            external = report.restored_external,
            spawned = report.restored_spawned,
            predefined = report.predefined_registered,
            skipped = report.skipped,
            "Boot recovery finished"
        );
        report
    }

    async fn restore_external(&self, record: &PersistedProvider) -> bool {
        let endpoint = match &record.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                warn!(tool_id = %record.registry_id, "Persisted external provider has no endpoint");
                return false;
            }
        };

        if !probe::ping(&endpoint, self.config.probe_timeout).await {
            // Transient unreachability: keep the record, register later.
            warn!(tool_id = %record.registry_id, "Persisted provider unreachable, keeping record");
            return false;
        }

        let descriptor = ToolDescriptor::mcp_server(
            record.registry_id.clone(),
            record.display_name.clone(),
            String::new(),
            endpoint,
        )
        .with_provenance(Provenance::External);

        match self.gateway.register_remote_server(descriptor).await {
            Ok(_) => {
                info!(tool_id = %record.registry_id, "Restored external provider");
                true
            }
            Err(e) => {
                warn!(tool_id = %record.registry_id, error = %e, "Restore failed");
                false
            }
        }
    }

    async fn restore_spawned(&self, record: &PersistedProvider) -> bool {
        let command = match &record.command {
            Some(command) if !command.is_empty() => command.clone(),
            _ => {
                warn!(tool_id = %record.registry_id, "Persisted spawned provider has no command");
                return false;
            }
        };

        let mut config = InstallConfig::new(record.registry_id.clone(), command);
        config.display_name = record.display_name.clone();
        config.port = record.port_hint;

        let outcome = match self.runner.install(config).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(tool_id = %record.registry_id, error = %e, "Respawn from manifest failed");
                return false;
            }
        };

        if !self
            .wait_reachable(&outcome.endpoint, self.config.registration_timeout)
            .await
        {
            warn!(
                tool_id = %record.registry_id,
                endpoint = %outcome.endpoint,
                "Respawned provider never became reachable"
            );
            self.runner.stop(outcome.handle).await;
            return false;
        }

        let descriptor = ToolDescriptor::mcp_server(
            record.registry_id.clone(),
            record.display_name.clone(),
            String::new(),
            outcome.endpoint.clone(),
        )
        .with_provenance(Provenance::Spawned);

        match self.gateway.register_remote_server(descriptor).await {
            Ok(_) => {
                self.spawned_handles
                    .write()
                    .await
                    .insert(record.registry_id.clone(), outcome.handle);
                info!(tool_id = %record.registry_id, port = outcome.port, "Restored spawned provider");
                true
            }
            Err(e) => {
                warn!(tool_id = %record.registry_id, error = %e, "Restore registration failed");
                self.runner.stop(outcome.handle).await;
                false
            }
        }
    }

    /// Admin install flow: spawn, probe, register, persist.
    pub async fn install_and_register(&self, request: InstallRequest) -> Result<InstallOutcome> {
        let mut config = InstallConfig::new(request.registry_id.clone(), request.command.clone());
        config.display_name = request.display_name.clone();
        config.port = request.port;
        config.env = request.env.clone();

        let outcome = self.runner.install(config).await?;

        if !self
            .wait_reachable(&outcome.endpoint, self.config.registration_timeout)
            .await
        {
            self.runner.stop(outcome.handle).await;
            return Err(Error::connection(format!(
                "installed provider '{}' never answered at {}",
                request.registry_id, outcome.endpoint
            )));
        }

        let mut descriptor = ToolDescriptor::mcp_server(
            request.registry_id.clone(),
            request.display_name,
            request.description,
            outcome.endpoint.clone(),
        )
        .with_provenance(Provenance::Spawned)
        .with_tags(request.tags);
        descriptor.capabilities = request.capabilities;

        self.gateway.register_remote_server(descriptor.clone()).await?;

        // Persist only after the registration committed.
        if let Err(e) = self
            .manifest
            .put(PersistedProvider::spawned(
                &descriptor,
                request.command,
                outcome.port,
            ))
            .await
        {
            warn!(tool_id = %request.registry_id, error = %e, "Manifest write failed");
        }

        self.spawned_handles
            .write()
            .await
            .insert(request.registry_id, outcome.handle);

        Ok(outcome)
    }

    /// Register a pre-running external server and persist it.
    pub async fn register_external(&self, descriptor: ToolDescriptor) -> Result<RegisterOutcome> {
        if descriptor.kind != ToolKind::McpServer {
            return Err(Error::invalid_argument(
                "external registration requires an mcp_server descriptor",
            ));
        }
        let record = PersistedProvider::external(&descriptor);
        let outcome = self.gateway.register_remote_server(descriptor).await?;
        if let Err(e) = self.manifest.put(record).await {
            warn!(error = %e, "Manifest write failed");
        }
        Ok(outcome)
    }

    /// Unregister a provider everywhere: registry, manifest, process.
    pub async fn unregister(&self, registry_id: &str) -> Result<Arc<ToolDescriptor>> {
        let descriptor = self.gateway.unregister(registry_id).await?;
        if let Err(e) = self.manifest.remove(registry_id).await {
            warn!(tool_id = %registry_id, error = %e, "Manifest removal failed");
        }
        if let Some(handle) = self.spawned_handles.write().await.remove(registry_id) {
            self.runner.stop(handle).await;
        }
        Ok(descriptor)
    }

    /// Periodic reachability sweep over all remote providers. Degraded
    /// providers get their connector recycled but stay registered.
    pub async fn run_health_sweep(self: Arc<Self>) {
        let cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would race boot registration.
        ticker.tick().await;

        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "Health sweep started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Health sweep shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One pass of the health sweep; factored out for tests.
    pub async fn sweep_once(&self) -> usize {
        let remotes = self
            .gateway
            .enumerate(&RegistryFilter {
                kind: Some(ToolKind::McpServer),
                ..Default::default()
            })
            .await;

        let mut degraded = 0;
        for descriptor in remotes {
            let Some(endpoint) = descriptor.endpoint.as_deref() else {
                continue;
            };
            if !probe::ping(endpoint, self.config.probe_timeout).await {
                degraded += 1;
                warn!(tool_id = %descriptor.registry_id, "Provider failed health probe, recycling connector");
                self.gateway.pool().reset(&descriptor.registry_id).await;
            }
        }
        debug!(degraded, "Health sweep pass complete");
        degraded
    }

    /// Shutdown drain: stop sweeps, refuse dispatches, cancel in-flight
    /// calls, stop children, flush persistence.
    pub async fn shutdown(&self) {
        info!("Supervisor shutting down");
        self.cancel.cancel();
        self.gateway.shutdown().await;
        self.runner.cleanup_all().await;
        if let Err(e) = self.manifest.flush().await {
            warn!(error = %e, "Manifest flush failed during shutdown");
        }
    }

    async fn wait_reachable(&self, endpoint: &str, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if probe::ping(endpoint, self.config.probe_timeout).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

/// Providers baked into the build. Re-derived on every boot, never
/// persisted.
pub fn predefined_providers() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::mcp_server(
            "search_tool",
            "Search Tool MCP Server",
            "Advanced search and research capabilities",
            "ws://localhost:8082/mcp",
        )
        .with_provenance(Provenance::Predefined)
        .with_tags(vec!["search".into(), "web".into(), "research".into()])
        .with_capability(
            Capability::new("search_web", "Search the web using multiple search engines")
                .with_param("query", ParamSchema::required(ParamType::String, "Search query"))
                .with_param(
                    "max_results",
                    ParamSchema::optional(ParamType::Integer, "Maximum results"),
                ),
        ),
        ToolDescriptor::mcp_server(
            "browser_use",
            "Browser Use MCP Server",
            "AI-powered browser automation and control",
            "ws://localhost:8084/mcp",
        )
        .with_provenance(Provenance::Predefined)
        .with_tags(vec!["browser".into(), "automation".into(), "ai".into()])
        .with_capability(
            Capability::new(
                "browser_use_execute_task",
                "Execute complex browser tasks using AI",
            )
            .with_param(
                "task",
                ParamSchema::required(ParamType::String, "Natural language task description"),
            )
            .with_param(
                "max_steps",
                ParamSchema::optional(ParamType::Integer, "Maximum execution steps"),
            )
            .with_param(
                "use_vision",
                ParamSchema::optional(ParamType::Boolean, "Enable visual understanding"),
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            probe_timeout: Duration::from_millis(300),
            registration_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(30),
        }
    }

    async fn supervisor_with_manifest(
        manifest: Arc<ManifestStore>,
    ) -> (Arc<Supervisor>, Arc<ToolGateway>) {
        let gateway = Arc::new(ToolGateway::new(Duration::from_secs(5)));
        let runner = Arc::new(ProcessRunner::new(18700, 18800));
        let supervisor = Arc::new(Supervisor::new(
            gateway.clone(),
            runner,
            manifest,
            test_config(),
        ));
        (supervisor, gateway)
    }

    /// A provider that accepts WebSocket connections and answers pings.
    async fn spawn_pingable_provider() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                    while let Some(Ok(message)) = ws.next().await {
                        if let Message::Text(_) = message {
                            let _ = ws
                                .send(Message::Text(r#"{"type":"pong"}"#.to_string()))
                                .await;
                        }
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_bootstrap_restores_reachable_external() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(
            ManifestStore::open(dir.path().join("providers.json"))
                .await
                .unwrap(),
        );
        let endpoint = spawn_pingable_provider().await;
        manifest
            .put(PersistedProvider {
                registry_id: "ext".into(),
                display_name: "External".into(),
                kind: ToolKind::McpServer,
                endpoint: Some(endpoint),
                provenance: Provenance::External,
                command: None,
                port_hint: None,
            })
            .await
            .unwrap();

        let (supervisor, gateway) = supervisor_with_manifest(manifest.clone()).await;
        let report = supervisor.bootstrap().await;

        assert_eq!(report.restored_external, 1);
        assert!(gateway.lookup("ext").await.is_some());
        // Record remains persisted after restore.
        assert!(manifest.get("ext").await.is_some());
    }

    #[tokio::test]
    async fn test_bootstrap_keeps_unreachable_record() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(
            ManifestStore::open(dir.path().join("providers.json"))
                .await
                .unwrap(),
        );
        manifest
            .put(PersistedProvider {
                registry_id: "down".into(),
                display_name: "Down".into(),
                kind: ToolKind::McpServer,
                endpoint: Some("ws://127.0.0.1:9".into()),
                provenance: Provenance::External,
                command: None,
                port_hint: None,
            })
            .await
            .unwrap();

        let (supervisor, gateway) = supervisor_with_manifest(manifest.clone()).await;
        let report = supervisor.bootstrap().await;

        assert_eq!(report.restored_external, 0);
        assert_eq!(report.skipped, 1 + predefined_providers().len());
        assert!(gateway.lookup("down").await.is_none());
        // Transient unreachability never drops the record.
        assert!(manifest.get("down").await.is_some());
    }

    #[tokio::test]
    async fn test_predefined_skipped_without_error_when_down() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(
            ManifestStore::open(dir.path().join("providers.json"))
                .await
                .unwrap(),
        );
        let (supervisor, gateway) = supervisor_with_manifest(manifest).await;
        let report = supervisor.bootstrap().await;

        // Nothing listens on the predefined ports in tests.
        assert_eq!(report.predefined_registered, 0);
        assert_eq!(gateway.registry().tool_count().await, 0);
    }

    #[tokio::test]
    async fn test_register_external_persists() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(
            ManifestStore::open(dir.path().join("providers.json"))
                .await
                .unwrap(),
        );
        let (supervisor, gateway) = supervisor_with_manifest(manifest.clone()).await;

        let descriptor = ToolDescriptor::mcp_server(
            "browser",
            "Browser",
            "browser automation",
            "ws://127.0.0.1:9100/mcp",
        );
        supervisor.register_external(descriptor).await.unwrap();

        assert!(gateway.lookup("browser").await.is_some());
        let record = manifest.get("browser").await.unwrap();
        assert_eq!(record.provenance, Provenance::External);

        supervisor.unregister("browser").await.unwrap();
        assert!(gateway.lookup("browser").await.is_none());
        assert!(manifest.get("browser").await.is_none());
    }

    #[tokio::test]
    async fn test_install_fails_when_provider_never_answers() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(
            ManifestStore::open(dir.path().join("providers.json"))
                .await
                .unwrap(),
        );
        let (supervisor, gateway) = supervisor_with_manifest(manifest.clone()).await;

        let request = InstallRequest {
            registry_id: "mute".into(),
            display_name: "Mute".into(),
            description: String::new(),
            command: vec!["sh".into(), "-c".into(), "sleep 30".into()],
            port: None,
            capabilities: vec![],
            tags: vec![],
            env: HashMap::new(),
        };

        let result = supervisor.install_and_register(request).await;
        assert!(result.is_err());
        // Spawn failure is contained: nothing registered, nothing persisted.
        assert!(gateway.lookup("mute").await.is_none());
        assert!(manifest.get("mute").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_recycles_unreachable_connectors() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(
            ManifestStore::open(dir.path().join("providers.json"))
                .await
                .unwrap(),
        );
        let (supervisor, gateway) = supervisor_with_manifest(manifest).await;

        gateway
            .register_remote_server(ToolDescriptor::mcp_server(
                "gone",
                "Gone",
                "",
                "ws://127.0.0.1:9/mcp",
            ))
            .await
            .unwrap();

        let degraded = supervisor.sweep_once().await;
        assert_eq!(degraded, 1);
        // Still registered despite failing the probe.
        assert!(gateway.lookup("gone").await.is_some());
    }

    #[tokio::test]
    async fn test_predefined_table_shape() {
        let predefined = predefined_providers();
        assert_eq!(predefined.len(), 2);
        for descriptor in predefined {
            assert_eq!(descriptor.kind, ToolKind::McpServer);
            assert_eq!(descriptor.provenance, Some(Provenance::Predefined));
            assert!(descriptor.endpoint.is_some());
            assert!(!descriptor.capabilities.is_empty());
        }
    }
}
