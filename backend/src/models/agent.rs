use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agent_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl AgentStatus {
    /// States in which the agent owns a pid and a port
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent entity: the persisted definition of a worker process and its
/// runtime status
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: AgentStatus,
    pub config: serde_json::Value,
    pub template_id: Option<i64>,
    pub process_id: Option<i32>,
    pub port: Option<i32>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub restart_count: i32,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for agent creation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub name: String,
    pub description: Option<String>,
    pub config: serde_json::Value,
    pub template_id: Option<i64>,
}

/// Request payload for agent update (accepted only while stopped/error)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<serde_json::Value>,
}

/// Request payload for stop
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopAgentRequest {
    #[serde(default)]
    pub force: bool,
}

/// Response payload for a successful start
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub agent_id: i64,
    pub port: u16,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Memory usage reported by a worker metrics record
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub rss: i64,
    pub heap_total: i64,
    pub heap_used: i64,
}

/// CPU usage reported by a worker metrics record
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CpuUsage {
    pub user: f64,
    pub system: f64,
}

/// Live process details for one agent
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub agent_id: i64,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    /// Milliseconds since the child was spawned
    pub uptime: Option<u64>,
    pub memory: Option<MemoryUsage>,
    pub cpu: Option<CpuUsage>,
    pub heartbeat_age_ms: Option<u64>,
    pub restart_count: i32,
}

/// Health summary for one agent
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHealth {
    pub is_running: bool,
    pub is_healthy: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// One entry of the per-status breakdown in the stats response
#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: AgentStatus,
    pub count: i64,
}

/// Fleet-wide stats response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub total: i64,
    pub running: i64,
    pub errors: i64,
    pub by_status: Vec<StatusCount>,
}

/// Query parameters for the agent list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<AgentStatus>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ListAgentsQuery {
    const DEFAULT_LIMIT: i64 = 10;
    const MAX_LIMIT: i64 = 100;

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }
}
