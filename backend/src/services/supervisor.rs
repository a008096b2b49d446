//! Child-process supervision.
//!
//! The supervisor owns the OS-level lifetime of every running agent: it
//! spawns the worker program, parses the structured status stream on
//! stdout, forwards stderr to the log sink, and reaps exits. It writes
//! pid, heartbeat, metric, and log records through the [`TelemetrySink`];
//! it never writes `status`. Exits are reported on a channel and the
//! policy (stopped vs error vs auto-restart) is applied elsewhere.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::models::{Agent, CpuUsage, MemoryUsage};
use crate::services::agent_store::{AgentStore, StoreError};

/// Configuration for the process supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Path to the worker program every agent runs
    pub worker_path: PathBuf,
    /// How long a starting worker may take to report ready
    pub ready_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL
    pub grace_timeout: Duration,
    /// Expected worker heartbeat interval; store writes are debounced to
    /// half of this
    pub heartbeat_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_path: PathBuf::from("./agent-worker"),
            ready_timeout: Duration::from_secs(30),
            grace_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Worker program not found: {0}")]
    WorkerMissing(PathBuf),
    #[error("Agent {0} already has a live process")]
    AlreadyRunning(i64),
    #[error("Agent {0} has no live process")]
    NotRunning(i64),
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),
    #[error("Agent {0} did not report ready in time")]
    StartupTimeout(i64),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Where the supervisor writes pid, heartbeat, metric, and log records.
/// Production uses the [`AgentStore`]; tests substitute a recorder.
#[async_trait]
pub trait TelemetrySink: Send + Sync + 'static {
    async fn process_started(&self, agent_id: i64, pid: u32) -> Result<(), StoreError>;
    async fn heartbeat(&self, agent_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn metrics(
        &self,
        agent_id: i64,
        memory: MemoryUsage,
        cpu: CpuUsage,
    ) -> Result<(), StoreError>;
    async fn log(&self, agent_id: i64, level: &str, message: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl TelemetrySink for AgentStore {
    async fn process_started(&self, agent_id: i64, pid: u32) -> Result<(), StoreError> {
        self.set_process_id(agent_id, pid).await
    }

    async fn heartbeat(&self, agent_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.touch_heartbeat(agent_id, at).await
    }

    async fn metrics(
        &self,
        agent_id: i64,
        memory: MemoryUsage,
        cpu: CpuUsage,
    ) -> Result<(), StoreError> {
        self.record_metrics(agent_id, memory, cpu).await
    }

    async fn log(&self, agent_id: i64, level: &str, message: &str) -> Result<(), StoreError> {
        self.append_log(agent_id, level, message).await
    }
}

/// One record of the worker's stdout status vocabulary
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StatusRecord {
    Ready,
    Heartbeat {
        #[serde(rename = "uptimeMs", default)]
        uptime_ms: u64,
        #[serde(rename = "requestCount", default)]
        request_count: u64,
        #[serde(rename = "errorCount", default)]
        error_count: u64,
    },
    Metrics {
        memory: MemoryUsage,
        cpu: CpuUsage,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObservedStatus {
    Starting,
    Running,
    Exited,
}

/// In-memory registry entry for one live child
#[derive(Debug)]
struct ProcessEntry {
    pid: u32,
    port: u16,
    started_at: Instant,
    last_heartbeat: Option<DateTime<Utc>>,
    last_memory: Option<MemoryUsage>,
    last_cpu: Option<CpuUsage>,
    observed: ObservedStatus,
    stop_requested: bool,
    exit_code: Option<i32>,
}

/// Point-in-time view of a registry entry
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub port: u16,
    pub uptime: Duration,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub memory: Option<MemoryUsage>,
    pub cpu: Option<CpuUsage>,
}

/// An unexpected child exit, reported for policy handling
#[derive(Debug, Clone)]
pub struct ExitNotice {
    pub agent_id: i64,
    pub exit_code: Option<i32>,
}

type Registry = Arc<RwLock<HashMap<i64, ProcessEntry>>>;

/// Owns every live agent child process
pub struct ProcessSupervisor {
    registry: Registry,
    sink: Arc<dyn TelemetrySink>,
    config: SupervisorConfig,
    exit_tx: mpsc::Sender<ExitNotice>,
}

impl ProcessSupervisor {
    /// Create a supervisor; the receiver carries unexpected-exit notices
    pub fn new(
        config: SupervisorConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> (Self, mpsc::Receiver<ExitNotice>) {
        let (exit_tx, exit_rx) = mpsc::channel(64);
        (
            Self {
                registry: Arc::new(RwLock::new(HashMap::new())),
                sink,
                config,
                exit_tx,
            },
            exit_rx,
        )
    }

    /// Spawn the worker for an agent whose row already holds a fresh port,
    /// and wait for it to report ready.
    ///
    /// Returns the child pid. On readiness timeout the child is killed and
    /// no exit notice is emitted.
    pub async fn spawn(
        &self,
        agent: &Agent,
        effective_config: &serde_json::Value,
    ) -> Result<u32, SupervisorError> {
        if !self.config.worker_path.exists() {
            return Err(SupervisorError::WorkerMissing(
                self.config.worker_path.clone(),
            ));
        }

        let port = agent
            .port
            .ok_or_else(|| SupervisorError::Spawn("agent has no port assigned".to_string()))?
            as u16;

        {
            let registry = self.registry.read().await;
            if let Some(entry) = registry.get(&agent.id) {
                if entry.observed != ObservedStatus::Exited {
                    return Err(SupervisorError::AlreadyRunning(agent.id));
                }
            }
        }

        let config_json = serde_json::to_string(effective_config)
            .map_err(|e| SupervisorError::Spawn(format!("unserializable config: {e}")))?;

        let mut cmd = Command::new(&self.config.worker_path);
        cmd.env("AGENT_ID", agent.id.to_string())
            .env("AGENT_PORT", port.to_string())
            .env("AGENT_NAME", &agent.name)
            .env("AGENT_CONFIG", config_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Spawn("child exited before pid read".to_string()))?;

        {
            let mut registry = self.registry.write().await;
            registry.insert(
                agent.id,
                ProcessEntry {
                    pid,
                    port,
                    started_at: Instant::now(),
                    last_heartbeat: None,
                    last_memory: None,
                    last_cpu: None,
                    observed: ObservedStatus::Starting,
                    stop_requested: false,
                    exit_code: None,
                },
            );
        }

        // Write the pid back before anything can observe the child. If the
        // row moved under us the start lost its race; tear the child down.
        if let Err(e) = self.sink.process_started(agent.id, pid).await {
            warn!(agent_id = agent.id, error = %e, "pid write failed, killing child");
            self.mark_stop_requested(agent.id).await;
            send_signal(pid, libc::SIGKILL);
            self.registry.write().await.remove(&agent.id);
            return Err(e.into());
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (ready_tx, ready_rx) = oneshot::channel();

        if let Some(out) = stdout {
            tokio::spawn(read_status_stream(
                agent.id,
                out,
                self.registry.clone(),
                self.sink.clone(),
                ready_tx,
                self.config.heartbeat_interval / 2,
            ));
        }
        if let Some(err) = stderr {
            let sink = self.sink.clone();
            let agent_id = agent.id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::error!(agent_id, "worker stderr: {line}");
                    let _ = sink.log(agent_id, "error", &line).await;
                }
            });
        }

        // Reaper: record the exit and report it unless a stop asked for it.
        let registry = self.registry.clone();
        let exit_tx = self.exit_tx.clone();
        let agent_id = agent.id;
        tokio::spawn(async move {
            let status = child.wait().await;
            let exit_code = status.as_ref().ok().and_then(|s| s.code());

            let requested = {
                let mut map = registry.write().await;
                match map.get_mut(&agent_id) {
                    Some(entry) => {
                        entry.observed = ObservedStatus::Exited;
                        entry.exit_code = exit_code;
                        entry.stop_requested
                    }
                    // Entry already torn down (startup timeout path).
                    None => true,
                }
            };

            if requested {
                debug!(agent_id, ?exit_code, "worker exited after stop request");
            } else {
                info!(agent_id, ?exit_code, "worker exited unexpectedly");
                let _ = exit_tx.send(ExitNotice { agent_id, exit_code }).await;
            }
        });

        info!(agent_id = agent.id, pid, port, "worker spawned");

        match timeout(self.config.ready_timeout, ready_rx).await {
            Ok(Ok(())) => Ok(pid),
            // Channel dropped means the stdout stream closed before ready;
            // treat it like a readiness timeout.
            Ok(Err(_)) | Err(_) => {
                warn!(agent_id = agent.id, "worker missed ready deadline");
                self.mark_stop_requested(agent.id).await;
                send_signal(pid, libc::SIGKILL);
                self.registry.write().await.remove(&agent.id);
                Err(SupervisorError::StartupTimeout(agent.id))
            }
        }
    }

    /// Stop a live child. Graceful stops get SIGTERM and the grace period
    /// before escalating to SIGKILL; `force` goes straight to SIGKILL.
    ///
    /// Returns the child's exit code once reaped. The registry entry is
    /// left in place (observed = exited) for the caller to remove after it
    /// has persisted the final status.
    pub async fn stop(&self, agent_id: i64, force: bool) -> Result<Option<i32>, SupervisorError> {
        let pid = {
            let mut registry = self.registry.write().await;
            let entry = registry
                .get_mut(&agent_id)
                .ok_or(SupervisorError::NotRunning(agent_id))?;

            if entry.observed == ObservedStatus::Exited {
                return Ok(entry.exit_code);
            }
            entry.stop_requested = true;
            entry.pid
        };

        if force {
            send_signal(pid, libc::SIGKILL);
        } else {
            send_signal(pid, libc::SIGTERM);
        }

        let deadline = Instant::now() + self.config.grace_timeout;
        let mut escalated = force;

        loop {
            {
                let registry = self.registry.read().await;
                match registry.get(&agent_id) {
                    Some(entry) if entry.observed == ObservedStatus::Exited => {
                        return Ok(entry.exit_code);
                    }
                    Some(_) => {}
                    None => return Ok(None),
                }
            }

            if !escalated && Instant::now() >= deadline {
                warn!(agent_id, pid, "grace period expired, escalating to SIGKILL");
                send_signal(pid, libc::SIGKILL);
                escalated = true;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Drop a reaped agent from the registry
    pub async fn remove(&self, agent_id: i64) {
        self.registry.write().await.remove(&agent_id);
    }

    /// Whether the agent currently has a non-exited child
    pub async fn is_live(&self, agent_id: i64) -> bool {
        let registry = self.registry.read().await;
        registry
            .get(&agent_id)
            .is_some_and(|e| e.observed != ObservedStatus::Exited)
    }

    pub async fn snapshot(&self, agent_id: i64) -> Option<ProcessSnapshot> {
        let registry = self.registry.read().await;
        registry.get(&agent_id).map(snapshot_entry)
    }

    pub async fn snapshots(&self) -> Vec<(i64, ProcessSnapshot)> {
        let registry = self.registry.read().await;
        registry
            .iter()
            .map(|(id, entry)| (*id, snapshot_entry(entry)))
            .collect()
    }

    async fn mark_stop_requested(&self, agent_id: i64) {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.get_mut(&agent_id) {
            entry.stop_requested = true;
        }
    }
}

fn snapshot_entry(entry: &ProcessEntry) -> ProcessSnapshot {
    ProcessSnapshot {
        pid: entry.pid,
        port: entry.port,
        uptime: entry.started_at.elapsed(),
        last_heartbeat: entry.last_heartbeat,
        memory: entry.last_memory,
        cpu: entry.last_cpu,
    }
}

/// Parse the one-record-per-line status stream from a worker's stdout.
///
/// The first `ready` or `heartbeat` record resolves the readiness channel;
/// heartbeats are debounced into the sink at `persist_every`.
async fn read_status_stream(
    agent_id: i64,
    stdout: tokio::process::ChildStdout,
    registry: Registry,
    sink: Arc<dyn TelemetrySink>,
    ready_tx: oneshot::Sender<()>,
    persist_every: Duration,
) {
    let mut ready_tx = Some(ready_tx);
    let mut last_persisted: Option<Instant> = None;
    let mut lines = BufReader::new(stdout).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let record = match serde_json::from_str::<StatusRecord>(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(agent_id, error = %e, "discarding unparseable status line");
                let _ = sink
                    .log(agent_id, "warn", &format!("unparseable status line: {line}"))
                    .await;
                continue;
            }
        };

        match record {
            StatusRecord::Ready => {
                {
                    let mut map = registry.write().await;
                    if let Some(entry) = map.get_mut(&agent_id) {
                        entry.observed = ObservedStatus::Running;
                    }
                }
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
            }
            StatusRecord::Heartbeat {
                uptime_ms,
                request_count,
                error_count,
            } => {
                let now = Utc::now();
                {
                    let mut map = registry.write().await;
                    if let Some(entry) = map.get_mut(&agent_id) {
                        entry.last_heartbeat = Some(now);
                        entry.observed = ObservedStatus::Running;
                    }
                }
                // A worker that heartbeats is alive even if its ready
                // record got lost.
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }

                debug!(agent_id, uptime_ms, request_count, error_count, "heartbeat");

                let due = match last_persisted {
                    None => true,
                    Some(t) => t.elapsed() >= persist_every,
                };
                if due {
                    last_persisted = Some(Instant::now());
                    let _ = sink.heartbeat(agent_id, now).await;
                }
            }
            StatusRecord::Metrics { memory, cpu } => {
                {
                    let mut map = registry.write().await;
                    if let Some(entry) = map.get_mut(&agent_id) {
                        entry.last_memory = Some(memory);
                        entry.last_cpu = Some(cpu);
                    }
                }
                let _ = sink.metrics(agent_id, memory, cpu).await;
            }
            StatusRecord::Unknown => {
                warn!(agent_id, "ignoring unknown status record type: {line}");
            }
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    /// Recording sink so process tests run without a database
    #[derive(Default)]
    struct RecordingSink {
        pids: StdMutex<Vec<(i64, u32)>>,
        heartbeats: StdMutex<Vec<i64>>,
        logs: StdMutex<Vec<(i64, String, String)>>,
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn process_started(&self, agent_id: i64, pid: u32) -> Result<(), StoreError> {
            self.pids.lock().unwrap().push((agent_id, pid));
            Ok(())
        }

        async fn heartbeat(&self, agent_id: i64, _at: DateTime<Utc>) -> Result<(), StoreError> {
            self.heartbeats.lock().unwrap().push(agent_id);
            Ok(())
        }

        async fn metrics(
            &self,
            _agent_id: i64,
            _memory: MemoryUsage,
            _cpu: CpuUsage,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn log(&self, agent_id: i64, level: &str, message: &str) -> Result<(), StoreError> {
            self.logs
                .lock()
                .unwrap()
                .push((agent_id, level.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn write_worker_script(body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("agentd-test-worker-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn test_agent(id: i64, port: i32) -> Agent {
        Agent {
            id,
            name: format!("test-agent-{id}"),
            description: None,
            status: crate::models::AgentStatus::Starting,
            config: serde_json::json!({"model": "m"}),
            template_id: None,
            process_id: None,
            port: Some(port),
            last_heartbeat: None,
            error_message: None,
            restart_count: 0,
            created_by: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_supervisor(
        worker: PathBuf,
        ready_timeout: Duration,
    ) -> (ProcessSupervisor, mpsc::Receiver<ExitNotice>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let config = SupervisorConfig {
            worker_path: worker,
            ready_timeout,
            grace_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_millis(200),
        };
        let (supervisor, exit_rx) = ProcessSupervisor::new(config, sink.clone());
        (supervisor, exit_rx, sink)
    }

    #[tokio::test]
    async fn spawn_reports_ready_and_records_pid() {
        let worker = write_worker_script("echo '{\"type\":\"ready\"}'\nsleep 30");
        let (supervisor, _exit_rx, sink) = test_supervisor(worker.clone(), Duration::from_secs(10));

        let agent = test_agent(1, 4310);
        let pid = supervisor
            .spawn(&agent, &agent.config)
            .await
            .expect("spawn should succeed");

        assert!(supervisor.is_live(1).await);
        assert_eq!(sink.pids.lock().unwrap().as_slice(), &[(1, pid)]);

        let snapshot = supervisor.snapshot(1).await.unwrap();
        assert_eq!(snapshot.pid, pid);
        assert_eq!(snapshot.port, 4310);

        supervisor.stop(1, true).await.unwrap();
        supervisor.remove(1).await;
        let _ = std::fs::remove_file(worker);
    }

    #[tokio::test]
    async fn spawn_times_out_without_ready() {
        let worker = write_worker_script("sleep 30");
        let (supervisor, _exit_rx, _sink) =
            test_supervisor(worker.clone(), Duration::from_millis(300));

        let agent = test_agent(2, 4311);
        let result = supervisor.spawn(&agent, &agent.config).await;
        assert!(matches!(result, Err(SupervisorError::StartupTimeout(2))));
        assert!(!supervisor.is_live(2).await);
        let _ = std::fs::remove_file(worker);
    }

    #[tokio::test]
    async fn heartbeat_resolves_readiness() {
        let worker = write_worker_script(
            "echo '{\"type\":\"heartbeat\",\"uptimeMs\":1,\"requestCount\":0,\"errorCount\":0}'\nsleep 30",
        );
        let (supervisor, _exit_rx, _sink) =
            test_supervisor(worker.clone(), Duration::from_secs(10));

        let agent = test_agent(3, 4312);
        supervisor
            .spawn(&agent, &agent.config)
            .await
            .expect("heartbeat should count as readiness");

        // The reader task updates the registry just after resolving readiness.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = supervisor.snapshot(3).await.unwrap();
        assert!(snapshot.last_heartbeat.is_some());

        supervisor.stop(3, true).await.unwrap();
        supervisor.remove(3).await;
        let _ = std::fs::remove_file(worker);
    }

    #[tokio::test]
    async fn unparseable_lines_are_logged_and_skipped() {
        let worker =
            write_worker_script("echo 'not json at all'\necho '{\"type\":\"ready\"}'\nsleep 30");
        let (supervisor, _exit_rx, sink) = test_supervisor(worker.clone(), Duration::from_secs(10));

        let agent = test_agent(4, 4313);
        supervisor.spawn(&agent, &agent.config).await.unwrap();

        let logs = sink.logs.lock().unwrap();
        assert!(logs
            .iter()
            .any(|(id, level, msg)| *id == 4 && level == "warn" && msg.contains("not json")));
        drop(logs);

        supervisor.stop(4, true).await.unwrap();
        supervisor.remove(4).await;
        let _ = std::fs::remove_file(worker);
    }

    #[tokio::test]
    async fn crash_emits_exit_notice() {
        let worker = write_worker_script("echo '{\"type\":\"ready\"}'\nsleep 0.2\nexit 3");
        let (supervisor, mut exit_rx, _sink) =
            test_supervisor(worker.clone(), Duration::from_secs(10));

        let agent = test_agent(5, 4314);
        supervisor.spawn(&agent, &agent.config).await.unwrap();

        let notice = timeout(Duration::from_secs(5), exit_rx.recv())
            .await
            .expect("exit notice should arrive")
            .expect("channel should be open");
        assert_eq!(notice.agent_id, 5);
        assert_eq!(notice.exit_code, Some(3));

        supervisor.remove(5).await;
        let _ = std::fs::remove_file(worker);
    }

    #[tokio::test]
    async fn graceful_stop_delivers_sigterm() {
        let worker = write_worker_script(
            "trap 'exit 0' TERM\necho '{\"type\":\"ready\"}'\nwhile :; do sleep 0.05; done",
        );
        let (supervisor, mut exit_rx, _sink) =
            test_supervisor(worker.clone(), Duration::from_secs(10));

        let agent = test_agent(6, 4315);
        supervisor.spawn(&agent, &agent.config).await.unwrap();

        let exit_code = supervisor.stop(6, false).await.unwrap();
        assert_eq!(exit_code, Some(0));

        // A requested stop must not produce an exit notice.
        assert!(
            timeout(Duration::from_millis(300), exit_rx.recv())
                .await
                .is_err()
        );

        supervisor.remove(6).await;
        assert!(!supervisor.is_live(6).await);
        let _ = std::fs::remove_file(worker);
    }

    #[tokio::test]
    async fn force_stop_is_idempotent() {
        let worker = write_worker_script("echo '{\"type\":\"ready\"}'\nsleep 30");
        let (supervisor, _exit_rx, _sink) =
            test_supervisor(worker.clone(), Duration::from_secs(10));

        let agent = test_agent(7, 4316);
        supervisor.spawn(&agent, &agent.config).await.unwrap();

        supervisor.stop(7, true).await.unwrap();
        // Second force stop on the reaped entry is a no-op.
        supervisor.stop(7, true).await.unwrap();

        supervisor.remove(7).await;
        assert!(matches!(
            supervisor.stop(7, true).await,
            Err(SupervisorError::NotRunning(7))
        ));
        let _ = std::fs::remove_file(worker);
    }

    #[tokio::test]
    async fn spawn_rejects_missing_worker() {
        let (supervisor, _exit_rx, _sink) = test_supervisor(
            PathBuf::from("/nonexistent/agent-worker"),
            Duration::from_secs(1),
        );

        let agent = test_agent(8, 4317);
        assert!(matches!(
            supervisor.spawn(&agent, &agent.config).await,
            Err(SupervisorError::WorkerMissing(_))
        ));
    }

    #[test]
    fn status_records_parse() {
        let ready: StatusRecord = serde_json::from_str("{\"type\":\"ready\"}").unwrap();
        assert!(matches!(ready, StatusRecord::Ready));

        let hb: StatusRecord = serde_json::from_str(
            "{\"type\":\"heartbeat\",\"uptimeMs\":1200,\"requestCount\":4,\"errorCount\":1}",
        )
        .unwrap();
        match hb {
            StatusRecord::Heartbeat {
                uptime_ms,
                request_count,
                error_count,
            } => {
                assert_eq!(uptime_ms, 1200);
                assert_eq!(request_count, 4);
                assert_eq!(error_count, 1);
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }

        let metrics: StatusRecord = serde_json::from_str(
            "{\"type\":\"metrics\",\"memory\":{\"rss\":1,\"heapTotal\":2,\"heapUsed\":3},\"cpu\":{\"user\":0.5,\"system\":0.1}}",
        )
        .unwrap();
        assert!(matches!(metrics, StatusRecord::Metrics { .. }));

        let unknown: StatusRecord = serde_json::from_str("{\"type\":\"telemetry\"}").unwrap();
        assert!(matches!(unknown, StatusRecord::Unknown));

        assert!(serde_json::from_str::<StatusRecord>("not json").is_err());
    }
}
