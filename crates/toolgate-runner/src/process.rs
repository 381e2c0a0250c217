//! Process runner for spawned tool servers
//!
//! Spawns the configured command with the chosen port injected through
//! the environment, captures bounded output tails for diagnostics, and
//! watches each child to enforce its restart policy. The runner owns
//! all process records; everyone else sees snapshots.

use std::collections::{HashMap, HashSet, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use toolgate_core::{Error, ProcessSnapshot, ProcessStatus, RestartPolicy, Result};

use crate::ports::find_available_port;

/// Bytes kept per output stream
const TAIL_CAPACITY: usize = 16 * 1024;
/// Grace period between SIGTERM and SIGKILL
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Spawn configuration for one provider
#[derive(Debug, Clone)]
pub struct InstallConfig {
    pub registry_id_hint: String,
    pub display_name: String,
    /// argv; the first element is the program
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    /// Explicit port; None selects one from the runner's range
    pub port: Option<u16>,
    pub restart_policy: RestartPolicy,
}

impl InstallConfig {
    pub fn new(registry_id_hint: impl Into<String>, command: Vec<String>) -> Self {
        let registry_id_hint = registry_id_hint.into();
        Self {
            display_name: registry_id_hint.clone(),
            registry_id_hint,
            command,
            env: HashMap::new(),
            port: None,
            restart_policy: RestartPolicy::default(),
        }
    }
}

/// Result of a successful install
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub handle: u64,
    pub registry_id_hint: String,
    pub endpoint: String,
    pub port: u16,
}

struct TailBuffer {
    bytes: VecDeque<u8>,
}

impl TailBuffer {
    fn new() -> Self {
        Self {
            bytes: VecDeque::new(),
        }
    }

    fn push_line(&mut self, line: &str) {
        self.bytes.extend(line.as_bytes());
        self.bytes.push_back(b'\n');
        while self.bytes.len() > TAIL_CAPACITY {
            self.bytes.pop_front();
        }
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.iter().copied().collect::<Vec<u8>>()).into_owned()
    }
}

struct Record {
    config: InstallConfig,
    port: u16,
    status: ProcessStatus,
    pid: Option<u32>,
    started_at: chrono::DateTime<chrono::Utc>,
    last_exit_code: Option<i32>,
    restarts: u32,
    restart_marks: VecDeque<Instant>,
    stdout_tail: TailBuffer,
    stderr_tail: TailBuffer,
    stop_requested: bool,
}

impl Record {
    fn snapshot(&self, handle: u64) -> ProcessSnapshot {
        ProcessSnapshot {
            handle,
            registry_id_hint: self.config.registry_id_hint.clone(),
            listen_port: self.port,
            command: self.config.command.clone(),
            restart_policy: self.config.restart_policy,
            status: self.status,
            started_at: self.started_at,
            last_exit_code: self.last_exit_code,
            restarts: self.restarts,
            stdout_tail: self.stdout_tail.contents(),
            stderr_tail: self.stderr_tail.contents(),
        }
    }
}

type Records = Arc<RwLock<HashMap<u64, Record>>>;

/// Spawns, monitors and stops provider processes
pub struct ProcessRunner {
    records: Records,
    next_handle: AtomicU64,
    port_range: (u16, u16),
}

impl ProcessRunner {
    pub fn new(port_range_start: u16, port_range_end: u16) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
            port_range: (port_range_start, port_range_end),
        }
    }

    /// Spawn a provider process and start watching it.
    pub async fn install(&self, config: InstallConfig) -> Result<InstallOutcome> {
        if config.command.is_empty() {
            return Err(Error::invalid_argument("install command must not be empty"));
        }

        let reserved = self.active_ports().await;
        let port = match config.port {
            Some(port) if !reserved.contains(&port) => port,
            Some(port) => {
                // The hinted port belongs to an active handle; pick a
                // fresh one nearby.
                warn!(port, "Hinted port already assigned, reallocating");
                self.pick_port(&reserved)?
            }
            None => self.pick_port(&reserved)?,
        };

        let child = spawn_child(&config, port)?;
        let pid = child.id();
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);

        info!(
            handle,
            provider = %config.registry_id_hint,
            port,
            pid,
            "Spawned provider process"
        );

        let record = Record {
            config: config.clone(),
            port,
            status: ProcessStatus::Running,
            pid,
            started_at: chrono::Utc::now(),
            last_exit_code: None,
            restarts: 0,
            restart_marks: VecDeque::new(),
            stdout_tail: TailBuffer::new(),
            stderr_tail: TailBuffer::new(),
            stop_requested: false,
        };
        self.records.write().await.insert(handle, record);

        let records = self.records.clone();
        let range = self.port_range;
        tokio::spawn(watch_loop(records, handle, child, range));

        Ok(InstallOutcome {
            handle,
            registry_id_hint: config.registry_id_hint,
            endpoint: format!("ws://127.0.0.1:{port}/mcp"),
            port,
        })
    }

    fn pick_port(&self, reserved: &HashSet<u16>) -> Result<u16> {
        find_available_port(self.port_range.0, self.port_range.1, reserved)
            .ok_or_else(|| Error::process("no free port in configured range"))
    }

    /// Request a stop: polite signal, grace period, then force.
    ///
    /// Returns false for an unknown handle.
    pub async fn stop(&self, handle: u64) -> bool {
        let pid = {
            let mut records = self.records.write().await;
            match records.get_mut(&handle) {
                Some(record) => {
                    record.stop_requested = true;
                    record.pid
                }
                None => return false,
            }
        };

        if let Some(pid) = pid {
            send_signal(pid, libc::SIGTERM);
            let deadline = Instant::now() + STOP_GRACE;
            loop {
                if !self.is_live(handle).await {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(handle, pid, "Grace period expired, sending SIGKILL");
                    send_signal(pid, libc::SIGKILL);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        true
    }

    async fn is_live(&self, handle: u64) -> bool {
        matches!(
            self.records.read().await.get(&handle).map(|r| r.status),
            Some(ProcessStatus::Starting | ProcessStatus::Running)
        )
    }

    pub async fn status(&self, handle: u64) -> Option<ProcessSnapshot> {
        self.records
            .read()
            .await
            .get(&handle)
            .map(|record| record.snapshot(handle))
    }

    pub async fn snapshot_all(&self) -> Vec<ProcessSnapshot> {
        let records = self.records.read().await;
        let mut list: Vec<_> = records
            .iter()
            .map(|(handle, record)| record.snapshot(*handle))
            .collect();
        list.sort_by_key(|s| s.handle);
        list
    }

    /// Ports held by live handles; never handed out again while active.
    pub async fn active_ports(&self) -> HashSet<u16> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| matches!(r.status, ProcessStatus::Starting | ProcessStatus::Running))
            .map(|r| r.port)
            .collect()
    }

    /// Stop everything we started.
    pub async fn cleanup_all(&self) {
        let handles: Vec<u64> = {
            let records = self.records.read().await;
            records
                .iter()
                .filter(|(_, r)| {
                    matches!(r.status, ProcessStatus::Starting | ProcessStatus::Running)
                })
                .map(|(h, _)| *h)
                .collect()
        };
        info!(count = handles.len(), "Stopping all provider processes");
        for handle in handles {
            self.stop(handle).await;
        }
    }
}

fn spawn_child(config: &InstallConfig, port: u16) -> Result<Child> {
    let mut command = Command::new(&config.command[0]);
    command
        .args(&config.command[1..])
        .envs(&config.env)
        .env(port_env_var(&config.registry_id_hint), port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    command
        .spawn()
        .map_err(|e| Error::process(format!("spawn of '{}' failed: {e}", config.command[0])))
}

/// Environment variable that tells a spawned provider its port, e.g.
/// `browser-navigator` gets `BROWSER_NAVIGATOR_PORT`.
pub fn port_env_var(registry_id_hint: &str) -> String {
    let upper: String = registry_id_hint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{upper}_PORT")
}

fn send_signal(pid: u32, signal: i32) {
    unsafe {
        libc::kill(pid as i32, signal);
    }
}

/// Attach line readers draining child output into the record tails.
fn attach_readers(records: Records, handle: u64, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let records = records.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(record) = records.write().await.get_mut(&handle) {
                    record.stdout_tail.push_line(&line);
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let records = records.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(record) = records.write().await.get_mut(&handle) {
                    record.stderr_tail.push_line(&line);
                }
            }
        });
    }
}

/// One watcher per handle: waits for exit, applies the restart policy,
/// respawns within budget.
async fn watch_loop(records: Records, handle: u64, mut child: Child, port_range: (u16, u16)) {
    loop {
        attach_readers(records.clone(), handle, &mut child);

        let exit = child.wait().await;
        let exit_code = exit.as_ref().ok().and_then(|s| s.code());

        enum Next {
            Done,
            Respawn(InstallConfig, u16),
        }

        let next = {
            let mut guard = records.write().await;
            let record = match guard.get_mut(&handle) {
                Some(record) => record,
                None => return,
            };
            record.last_exit_code = exit_code;
            record.pid = None;

            if record.stop_requested
                || matches!(record.config.restart_policy, RestartPolicy::Never)
            {
                record.status = ProcessStatus::Exited;
                info!(
                    handle,
                    provider = %record.config.registry_id_hint,
                    code = ?exit_code,
                    "Provider process exited"
                );
                Next::Done
            } else {
                let RestartPolicy::OnFailure {
                    max_restarts,
                    window_secs,
                } = record.config.restart_policy
                else {
                    unreachable!("Never handled above");
                };

                let now = Instant::now();
                let window = Duration::from_secs(window_secs);
                while record
                    .restart_marks
                    .front()
                    .is_some_and(|mark| now.duration_since(*mark) > window)
                {
                    record.restart_marks.pop_front();
                }

                if (record.restart_marks.len() as u32) < max_restarts {
                    record.restart_marks.push_back(now);
                    record.restarts += 1;
                    record.status = ProcessStatus::Starting;

                    // Reuse the port when still free, otherwise take a
                    // fresh one and update the record.
                    let port = if std::net::TcpListener::bind(("0.0.0.0", record.port)).is_ok() {
                        record.port
                    } else {
                        let reserved = HashSet::new();
                        match find_available_port(port_range.0, port_range.1, &reserved) {
                            Some(port) => port,
                            None => {
                                error!(handle, "No free port for respawn");
                                record.status = ProcessStatus::Crashed;
                                return;
                            }
                        }
                    };
                    record.port = port;
                    warn!(
                        handle,
                        provider = %record.config.registry_id_hint,
                        code = ?exit_code,
                        attempt = record.restarts,
                        "Provider crashed, respawning"
                    );
                    Next::Respawn(record.config.clone(), port)
                } else {
                    record.status = ProcessStatus::Crashed;
                    error!(
                        handle,
                        provider = %record.config.registry_id_hint,
                        code = ?exit_code,
                        "Provider crashed past restart budget"
                    );
                    Next::Done
                }
            }
        };

        match next {
            Next::Done => return,
            Next::Respawn(config, port) => match spawn_child(&config, port) {
                Ok(new_child) => {
                    let mut guard = records.write().await;
                    if let Some(record) = guard.get_mut(&handle) {
                        record.pid = new_child.id();
                        record.status = ProcessStatus::Running;
                        record.started_at = chrono::Utc::now();
                    }
                    child = new_child;
                }
                Err(e) => {
                    error!(handle, error = %e, "Respawn failed");
                    if let Some(record) = records.write().await.get_mut(&handle) {
                        record.status = ProcessStatus::Crashed;
                    }
                    return;
                }
            },
        }

        debug!(handle, "Watcher continuing after respawn");
    }
}
