//! Agent lifecycle controller.
//!
//! Sole writer of the agent state machine. Every intent, whether from the
//! API surface or the health monitor, lands here; per-agent mutexes keep
//! concurrent intents on the same agent from interleaving while different
//! agents proceed in parallel. Unexpected child exits arrive on a channel
//! and the recovery loop applies the exit/auto-restart policy in one
//! place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::models::{
    deep_merge, validate_config, Agent, AgentHealth, AgentStats, AgentStatus, CreateAgentRequest,
    ListAgentsQuery, Principal, ProcessInfo, StartResponse, UpdateAgentRequest, UserRole,
};
use crate::services::agent_store::{AgentPatch, AgentStore, NewAgent, StoreError};
use crate::services::port_allocator::{PortAllocator, PortError};
use crate::services::supervisor::{ExitNotice, ProcessSupervisor, SupervisorError};
use crate::services::template_store::{TemplateError, TemplateService};

/// Controller tunables
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Automatic restarts allowed before an agent is parked in error
    pub max_restarts: i32,
    /// Delay before an automatic restart after a crash
    pub restart_backoff: Duration,
    /// Expected worker heartbeat interval (healthy = beat within twice this)
    pub heartbeat_interval: Duration,
    /// How long the shutdown drain waits before force-stopping agents
    pub shutdown_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_backoff: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    InvalidName(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Agent name already exists: {0}")]
    NameConflict(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    NoPortAvailable(String),
    #[error("Supervisor is shutting down")]
    ShuttingDown,
    #[error("{0}")]
    Spawn(String),
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<StoreError> for ControllerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(format!("Agent not found: {id}")),
            StoreError::NameConflict(name) => Self::NameConflict(name),
            StoreError::StatusChanged(_) => Self::InvalidState("conflicting state".to_string()),
            StoreError::PortConflict(port) => {
                Self::InvalidState(format!("port {port} claimed concurrently"))
            }
            StoreError::Database(e) => Self::Database(e),
        }
    }
}

impl From<PortError> for ControllerError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NoPortAvailable(lo, hi) => {
                Self::NoPortAvailable(format!("no port available in range {lo}-{hi}"))
            }
            PortError::Store(e) => e.into(),
        }
    }
}

impl From<TemplateError> for ControllerError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound(id) => Self::NotFound(format!("Template not found: {id}")),
            TemplateError::Database(e) => Self::Database(e),
            other => Self::InvalidConfig(other.to_string()),
        }
    }
}

impl From<ControllerError> for AppError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::InvalidState(msg) => AppError::Validation(msg),
            ControllerError::InvalidName(msg) => AppError::Validation(msg),
            ControllerError::NotFound(msg) => AppError::NotFound(msg),
            ControllerError::Forbidden(msg) => AppError::Forbidden(msg),
            ControllerError::NameConflict(name) => {
                AppError::Conflict(format!("Agent name already exists: {name}"))
            }
            ControllerError::InvalidConfig(msg) => AppError::Validation(msg),
            ControllerError::NoPortAvailable(msg) => AppError::ResourceExhausted(msg),
            ControllerError::ShuttingDown => {
                AppError::ResourceExhausted("supervisor is shutting down".to_string())
            }
            ControllerError::Spawn(msg) => AppError::Internal(msg),
            ControllerError::Database(e) => AppError::Database(e),
        }
    }
}

// ---------------------------------------------------------------------
// Transition acceptance. The full state machine lives in these checks
// plus the CAS conditions in the store.
// ---------------------------------------------------------------------

pub(crate) fn can_start(status: AgentStatus) -> bool {
    matches!(status, AgentStatus::Stopped | AgentStatus::Error)
}

pub(crate) fn can_stop(status: AgentStatus, force: bool) -> bool {
    match status {
        AgentStatus::Running | AgentStatus::Starting | AgentStatus::Stopping => true,
        // Force-stop doubles as idempotent cleanup for agents at rest.
        AgentStatus::Error | AgentStatus::Stopped => force,
    }
}

pub(crate) fn can_restart(status: AgentStatus) -> bool {
    matches!(status, AgentStatus::Running | AgentStatus::Error)
}

pub(crate) fn can_modify(status: AgentStatus) -> bool {
    matches!(status, AgentStatus::Stopped | AgentStatus::Error)
}

/// Renames are narrower than other definition changes: the name is
/// immutable unless the agent is fully stopped.
pub(crate) fn can_rename(status: AgentStatus) -> bool {
    status == AgentStatus::Stopped
}

fn validate_agent_name(name: &str) -> Result<(), ControllerError> {
    if name.is_empty() || name.len() > 64 {
        return Err(ControllerError::InvalidName(
            "agent name must be 1-64 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ControllerError::InvalidName(
            "agent name may only contain alphanumeric characters, hyphens, and underscores"
                .to_string(),
        ));
    }
    Ok(())
}

/// Applies user and monitor intents to the store/supervisor pair
pub struct AgentController {
    store: AgentStore,
    templates: TemplateService,
    allocator: PortAllocator,
    supervisor: Arc<ProcessSupervisor>,
    config: ControllerConfig,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    accepting: AtomicBool,
}

impl AgentController {
    pub fn new(
        store: AgentStore,
        templates: TemplateService,
        allocator: PortAllocator,
        supervisor: Arc<ProcessSupervisor>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            templates,
            allocator,
            supervisor,
            config,
            locks: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Serialize intents per agent: callers hold the returned guard for the
    /// duration of the operation.
    async fn agent_lock(&self, id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn require_operator(principal: &Principal) -> Result<(), ControllerError> {
        if principal.role.at_least(UserRole::Operator) {
            Ok(())
        } else {
            Err(ControllerError::Forbidden(
                "requires operator role".to_string(),
            ))
        }
    }

    fn authorize(principal: &Principal, agent: &Agent) -> Result<(), ControllerError> {
        if principal.is_admin() || agent.created_by == principal.user_id {
            Ok(())
        } else {
            Err(ControllerError::Forbidden(
                "not the owner of this agent".to_string(),
            ))
        }
    }

    // ------------------------------------------------------------------
    // CRUD intents
    // ------------------------------------------------------------------

    pub async fn create(
        &self,
        principal: &Principal,
        request: CreateAgentRequest,
    ) -> Result<Agent, ControllerError> {
        Self::require_operator(principal)?;
        validate_agent_name(&request.name)?;

        // Template config is the base layer; the user's keys win.
        let effective = match request.template_id {
            Some(template_id) => {
                let template = self.templates.get_active(template_id).await?;
                deep_merge(&template.config, &request.config)
            }
            None => request.config.clone(),
        };

        validate_config(&effective).map_err(|errors| {
            ControllerError::InvalidConfig(errors.join("; "))
        })?;

        let agent = self
            .store
            .create(NewAgent {
                name: request.name,
                description: request.description,
                config: effective,
                template_id: request.template_id,
                created_by: principal.user_id,
            })
            .await?;

        info!(agent_id = agent.id, name = %agent.name, "agent created");
        Ok(agent)
    }

    pub async fn get(&self, principal: &Principal, id: i64) -> Result<Agent, ControllerError> {
        let agent = self.store.get(id).await?;
        Self::authorize(principal, &agent)?;
        Ok(agent)
    }

    /// Listing is ownership-filtered for non-admin callers
    pub async fn list(
        &self,
        principal: &Principal,
        query: &ListAgentsQuery,
    ) -> Result<(Vec<Agent>, i64), ControllerError> {
        let owner_filter = (!principal.is_admin()).then_some(principal.user_id);
        Ok(self.store.list(query, owner_filter).await?)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: i64,
        request: UpdateAgentRequest,
    ) -> Result<Agent, ControllerError> {
        Self::require_operator(principal)?;

        let lock = self.agent_lock(id).await;
        let _guard = lock.lock().await;

        let agent = self.store.get(id).await?;
        Self::authorize(principal, &agent)?;

        if request.name.is_some() && !can_rename(agent.status) {
            return Err(ControllerError::InvalidState(format!(
                "cannot rename: status={}",
                agent.status
            )));
        }

        if !can_modify(agent.status) {
            return Err(ControllerError::InvalidState(format!(
                "cannot update: status={}",
                agent.status
            )));
        }

        if let Some(name) = &request.name {
            validate_agent_name(name)?;
        }
        if let Some(config) = &request.config {
            validate_config(config)
                .map_err(|errors| ControllerError::InvalidConfig(errors.join("; ")))?;
        }

        let updated = self
            .store
            .update_definition(
                id,
                AgentPatch {
                    name: request.name,
                    description: request.description,
                    config: request.config,
                },
            )
            .await?;

        Ok(updated)
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), ControllerError> {
        Self::require_operator(principal)?;

        let lock = self.agent_lock(id).await;
        let _guard = lock.lock().await;

        let agent = self.store.get(id).await?;
        Self::authorize(principal, &agent)?;

        if !can_modify(agent.status) {
            return Err(ControllerError::InvalidState(format!(
                "cannot delete: status={}",
                agent.status
            )));
        }

        self.store.delete(id).await?;
        self.locks.lock().await.remove(&id);
        info!(agent_id = id, "agent deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle intents
    // ------------------------------------------------------------------

    pub async fn start(
        &self,
        principal: &Principal,
        id: i64,
    ) -> Result<StartResponse, ControllerError> {
        Self::require_operator(principal)?;
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ControllerError::ShuttingDown);
        }

        let lock = self.agent_lock(id).await;
        let _guard = lock.lock().await;

        let agent = self.store.get(id).await?;
        Self::authorize(principal, &agent)?;

        if !can_start(agent.status) {
            return Err(ControllerError::InvalidState(format!(
                "cannot start: status={}",
                agent.status
            )));
        }

        self.start_locked(id, None).await
    }

    /// Allocate a port, claim it with the `-> starting` CAS, spawn the
    /// worker, and promote to `running` once it reports ready.
    ///
    /// Caller holds the agent lock and has verified the transition.
    /// `avoid_port` carries the previous port on restart paths so it is
    /// never immediately reused.
    async fn start_locked(
        &self,
        id: i64,
        avoid_port: Option<u16>,
    ) -> Result<StartResponse, ControllerError> {
        // Losing the port race to a concurrent start is expected; rescan
        // and try the next free port.
        let mut agent = None;
        for _ in 0..8 {
            let port = self.allocator.next_excluding(avoid_port).await?;
            match self.store.begin_start(id, port).await {
                Ok(row) => {
                    agent = Some(row);
                    break;
                }
                Err(StoreError::PortConflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let agent = agent.ok_or_else(|| {
            ControllerError::NoPortAvailable("port allocation kept losing races".to_string())
        })?;

        let port = agent.port.unwrap_or_default() as u16;

        match self.supervisor.spawn(&agent, &agent.config).await {
            Ok(pid) => {
                self.store.mark_running(id).await?;
                info!(agent_id = id, pid, port, "agent running");
                Ok(StartResponse {
                    agent_id: id,
                    port,
                    pid,
                    started_at: Utc::now(),
                })
            }
            Err(SupervisorError::StartupTimeout(_)) => {
                // The child was already killed; park the agent in error and
                // leave recovery to a manual intent.
                self.store
                    .mark_error(id, "startup timeout: worker never reported ready")
                    .await?;
                Err(ControllerError::Spawn(
                    "worker did not report ready within the startup timeout".to_string(),
                ))
            }
            Err(e) => {
                // Nothing observable happened yet; unwind to stopped.
                if let Err(unwind) = self.store.finish_stop(id, false).await {
                    warn!(agent_id = id, error = %unwind, "failed to unwind aborted start");
                }
                self.supervisor.remove(id).await;
                Err(ControllerError::Spawn(e.to_string()))
            }
        }
    }

    pub async fn stop(
        &self,
        principal: &Principal,
        id: i64,
        force: bool,
    ) -> Result<Agent, ControllerError> {
        Self::require_operator(principal)?;

        let lock = self.agent_lock(id).await;
        let _guard = lock.lock().await;

        let agent = self.store.get(id).await?;
        Self::authorize(principal, &agent)?;

        if !can_stop(agent.status, force) {
            return Err(ControllerError::InvalidState(format!(
                "cannot stop: status={}",
                agent.status
            )));
        }

        match agent.status {
            AgentStatus::Running | AgentStatus::Starting | AgentStatus::Stopping => {
                self.stop_locked(id, agent.status, force, true).await?;
            }
            // Force-stop on an agent at rest: reap any straggler child and
            // report success. The row keeps its state.
            AgentStatus::Stopped | AgentStatus::Error => {
                match self.supervisor.stop(id, true).await {
                    Ok(_) => self.supervisor.remove(id).await,
                    Err(SupervisorError::NotRunning(_)) => {}
                    Err(e) => warn!(agent_id = id, error = %e, "straggler cleanup failed"),
                }
            }
        }

        Ok(self.store.get(id).await?)
    }

    /// Drive a live agent to `stopped`. Caller holds the agent lock.
    ///
    /// `reset_restarts` distinguishes a clean manual stop (which zeroes the
    /// automatic-restart counter) from the stop half of a restart.
    async fn stop_locked(
        &self,
        id: i64,
        status: AgentStatus,
        force: bool,
        reset_restarts: bool,
    ) -> Result<(), ControllerError> {
        // A non-force stop always passes through `stopping`; a row already
        // there is a stop that died halfway, so just finish it.
        if status != AgentStatus::Stopping {
            self.store.begin_stop(id).await?;
        }

        match self.supervisor.stop(id, force).await {
            Ok(exit_code) => {
                info!(agent_id = id, ?exit_code, "worker stopped");
            }
            // No registry entry: the child is already gone (e.g. the
            // supervisor restarted). The row cleanup below is the backstop.
            Err(SupervisorError::NotRunning(_)) => {
                warn!(agent_id = id, "stop requested but no live child found");
            }
            Err(e) => return Err(ControllerError::Spawn(e.to_string())),
        }

        self.store.finish_stop(id, reset_restarts).await?;
        self.supervisor.remove(id).await;
        Ok(())
    }

    pub async fn restart(
        &self,
        principal: &Principal,
        id: i64,
    ) -> Result<StartResponse, ControllerError> {
        Self::require_operator(principal)?;
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ControllerError::ShuttingDown);
        }

        let lock = self.agent_lock(id).await;
        let _guard = lock.lock().await;

        let agent = self.store.get(id).await?;
        Self::authorize(principal, &agent)?;

        if !can_restart(agent.status) {
            return Err(ControllerError::InvalidState(format!(
                "cannot restart: status={}",
                agent.status
            )));
        }

        let prior_port = agent.port.map(|p| p as u16);
        if agent.status == AgentStatus::Running {
            self.stop_locked(id, agent.status, false, false).await?;
        }

        self.store.increment_restart_count(id).await?;
        // Fresh allocation on the way back up, skipping the port the
        // agent just vacated.
        self.start_locked(id, prior_port).await
    }

    // ------------------------------------------------------------------
    // Recovery: exit notices and stale-heartbeat intents
    // ------------------------------------------------------------------

    /// Consume unexpected-exit notices from the supervisor and apply the
    /// exit policy. Runs until the supervisor drops its sender.
    pub fn spawn_recovery_loop(
        self: Arc<Self>,
        mut exit_rx: mpsc::Receiver<ExitNotice>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notice) = exit_rx.recv().await {
                let controller = Arc::clone(&self);
                // Apply policy per agent so one backoff cannot delay
                // recovery of the rest of the fleet.
                tokio::spawn(async move {
                    controller.handle_exit(notice).await;
                });
            }
        })
    }

    async fn handle_exit(self: Arc<Self>, notice: ExitNotice) {
        let id = notice.agent_id;
        let lock = self.agent_lock(id).await;
        let _guard = lock.lock().await;

        self.supervisor.remove(id).await;

        let agent = match self.store.get(id).await {
            Ok(agent) => agent,
            Err(StoreError::NotFound(_)) => return,
            Err(e) => {
                error!(agent_id = id, error = %e, "exit handling failed to load agent");
                return;
            }
        };

        if !agent.status.is_live() {
            // A concurrent intent already settled the row.
            return;
        }

        match notice.exit_code {
            Some(0) => {
                info!(agent_id = id, "worker exited cleanly");
                if let Err(e) = self.store.finish_stop(id, false).await {
                    error!(agent_id = id, error = %e, "failed to persist clean exit");
                }
            }
            code => {
                let message = match code {
                    Some(n) => format!("process exited with code {n}"),
                    None => "process terminated by signal".to_string(),
                };
                warn!(agent_id = id, %message, "worker crashed");
                if let Err(e) = self.store.mark_error(id, &message).await {
                    error!(agent_id = id, error = %e, "failed to persist crash");
                    return;
                }

                if agent.restart_count < self.config.max_restarts
                    && self.accepting.load(Ordering::SeqCst)
                {
                    self.schedule_auto_restart(id, agent.port.map(|p| p as u16));
                } else {
                    info!(
                        agent_id = id,
                        restart_count = agent.restart_count,
                        "restart budget exhausted, staying in error"
                    );
                }
            }
        }
    }

    /// Queue an automatic restart after the configured backoff.
    ///
    /// The backoff sleeps outside the agent lock so a manual intent can
    /// win the race; the status re-check in `auto_restart` makes losing
    /// harmless.
    fn schedule_auto_restart(self: &Arc<Self>, id: i64, avoid_port: Option<u16>) {
        let controller = Arc::clone(self);
        let backoff = self.config.restart_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            controller.auto_restart(id, avoid_port).await;
        });
    }

    async fn auto_restart(&self, id: i64, avoid_port: Option<u16>) {
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        let lock = self.agent_lock(id).await;
        let _guard = lock.lock().await;

        let agent = match self.store.get(id).await {
            Ok(agent) => agent,
            Err(_) => return,
        };
        if agent.status != AgentStatus::Error {
            // A manual intent got here first.
            return;
        }

        if let Err(e) = self.store.increment_restart_count(id).await {
            error!(agent_id = id, error = %e, "failed to count automatic restart");
            return;
        }

        match self.start_locked(id, avoid_port).await {
            Ok(started) => {
                info!(agent_id = id, pid = started.pid, "agent auto-restarted");
            }
            Err(e) => {
                warn!(agent_id = id, error = %e, "auto-restart failed");
            }
        }
    }

    /// Recover one stale running agent on behalf of the health monitor.
    ///
    /// Restarts while the budget allows, otherwise parks the agent in
    /// `error` and records an alert so operators can see why.
    pub async fn recover_stale(&self, id: i64) -> Result<(), ControllerError> {
        let lock = self.agent_lock(id).await;
        let _guard = lock.lock().await;

        let agent = self.store.get(id).await?;
        if agent.status != AgentStatus::Running {
            return Ok(());
        }

        if agent.restart_count >= self.config.max_restarts {
            warn!(
                agent_id = id,
                restart_count = agent.restart_count,
                "unhealthy agent exhausted restart budget"
            );
            let _ = self.supervisor.stop(id, true).await;
            self.supervisor.remove(id).await;
            self.store
                .mark_error(id, "unhealthy: heartbeat timeout")
                .await?;
            let _ = self
                .store
                .append_alert(id, "heartbeat_timeout", "agent parked in error after restarts")
                .await;
            return Ok(());
        }

        info!(agent_id = id, "restarting stale agent");
        let prior_port = agent.port.map(|p| p as u16);
        self.stop_locked(id, agent.status, false, false).await?;
        self.store.increment_restart_count(id).await?;

        if let Err(e) = self.start_locked(id, prior_port).await {
            warn!(agent_id = id, error = %e, "stale-agent restart failed");
            let _ = self
                .store
                .mark_error(id, "unhealthy: heartbeat timeout")
                .await;
            let _ = self
                .store
                .append_alert(id, "heartbeat_timeout", "restart after stale heartbeat failed")
                .await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-side intents
    // ------------------------------------------------------------------

    pub async fn process_info(
        &self,
        principal: &Principal,
        id: i64,
    ) -> Result<ProcessInfo, ControllerError> {
        let agent = self.get(principal, id).await?;
        Ok(self.build_process_info(&agent).await)
    }

    async fn build_process_info(&self, agent: &Agent) -> ProcessInfo {
        let snapshot = self.supervisor.snapshot(agent.id).await;

        let last_heartbeat = snapshot
            .as_ref()
            .and_then(|s| s.last_heartbeat)
            .or(agent.last_heartbeat);

        ProcessInfo {
            agent_id: agent.id,
            pid: snapshot.as_ref().map(|s| s.pid),
            port: snapshot
                .as_ref()
                .map(|s| s.port)
                .or(agent.port.map(|p| p as u16)),
            uptime: snapshot.as_ref().map(|s| s.uptime.as_millis() as u64),
            memory: snapshot.as_ref().and_then(|s| s.memory),
            cpu: snapshot.as_ref().and_then(|s| s.cpu),
            heartbeat_age_ms: last_heartbeat
                .map(|at| (Utc::now() - at).num_milliseconds().max(0) as u64),
            restart_count: agent.restart_count,
        }
    }

    pub async fn health(
        &self,
        principal: &Principal,
        id: i64,
    ) -> Result<AgentHealth, ControllerError> {
        let agent = self.get(principal, id).await?;
        let snapshot = self.supervisor.snapshot(id).await;

        let last_heartbeat = snapshot
            .and_then(|s| s.last_heartbeat)
            .or(agent.last_heartbeat);

        let is_running = agent.status == AgentStatus::Running;
        let stale_after = self.config.heartbeat_interval * 2;
        let is_healthy = is_running
            && last_heartbeat.is_some_and(|at| {
                (Utc::now() - at).to_std().unwrap_or(Duration::MAX) <= stale_after
            });

        Ok(AgentHealth {
            is_running,
            is_healthy,
            last_heartbeat,
        })
    }

    /// Snapshot every live process (operator view)
    pub async fn list_processes(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ProcessInfo>, ControllerError> {
        Self::require_operator(principal)?;

        let mut infos = Vec::new();
        for (id, _) in self.supervisor.snapshots().await {
            if let Ok(agent) = self.store.get(id).await {
                infos.push(self.build_process_info(&agent).await);
            }
        }
        infos.sort_by_key(|info| info.agent_id);
        Ok(infos)
    }

    pub async fn stats(&self) -> Result<AgentStats, ControllerError> {
        let by_status = self.store.count_by_status().await?;
        let total = by_status.iter().map(|c| c.count).sum();
        let count_of = |status: AgentStatus| {
            by_status
                .iter()
                .find(|c| c.status == status)
                .map_or(0, |c| c.count)
        };

        Ok(AgentStats {
            total,
            running: count_of(AgentStatus::Running),
            errors: count_of(AgentStatus::Error),
            by_status,
        })
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Drain the fleet: refuse new start/restart intents, stop every live
    /// agent gracefully, and escalate to force-stop at the deadline.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("draining agents for shutdown");

        let live = match self.store.list_live().await {
            Ok(agents) => agents,
            Err(e) => {
                error!(error = %e, "failed to list live agents for shutdown");
                return;
            }
        };

        let drain = async {
            for agent in &live {
                let lock = self.agent_lock(agent.id).await;
                let _guard = lock.lock().await;
                if let Err(e) = self.stop_locked(agent.id, agent.status, false, false).await {
                    warn!(agent_id = agent.id, error = %e, "graceful drain failed");
                }
            }
        };

        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!("shutdown deadline reached, force-stopping remaining agents");
            for (id, _) in self.supervisor.snapshots().await {
                let _ = self.supervisor.stop(id, true).await;
                let _ = self.store.finish_stop(id, false).await;
                self.supervisor.remove(id).await;
            }
        }

        info!("agent drain complete");
    }
}
