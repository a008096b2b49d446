//! Persistent store for agents and their telemetry.
//!
//! Every status move is a single compare-and-set UPDATE conditioned on the
//! current status, checked through `rows_affected`. The partial unique
//! indexes on `port` and `process_id` are the final arbiter when two
//! writers race for the same resource.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;

use crate::models::{
    Agent, AgentStatus, CpuUsage, ListAgentsQuery, MemoryUsage, StatusCount,
};

/// Errors surfaced by store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Agent not found: {0}")]
    NotFound(i64),
    #[error("Agent name already exists: {0}")]
    NameConflict(String),
    #[error("Port already assigned: {0}")]
    PortConflict(i32),
    #[error("Agent {0} changed status concurrently")]
    StatusChanged(i64),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// New-agent row definition
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub description: Option<String>,
    pub config: serde_json::Value,
    pub template_id: Option<i64>,
    pub created_by: i64,
}

/// Definition patch applied while an agent is at rest
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<serde_json::Value>,
}

const LIVE_STATUSES: [AgentStatus; 3] = [
    AgentStatus::Starting,
    AgentStatus::Running,
    AgentStatus::Stopping,
];

const REST_STATUSES: [AgentStatus; 2] = [AgentStatus::Stopped, AgentStatus::Error];

/// Store service for the `agents` table and its telemetry children
#[derive(Debug, Clone)]
pub struct AgentStore {
    pool: PgPool,
}

impl AgentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new agent in state `stopped`
    pub async fn create(&self, def: NewAgent) -> Result<Agent, StoreError> {
        let result = sqlx::query_as::<_, Agent>(
            r#"
            INSERT INTO agents (name, description, config, template_id, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&def.name)
        .bind(&def.description)
        .bind(&def.config)
        .bind(def.template_id)
        .bind(def.created_by)
        .fetch_one(&self.pool)
        .await;

        result.map_err(|e| map_unique_violation(e, &def.name))
    }

    pub async fn get(&self, id: i64) -> Result<Agent, StoreError> {
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// Apply a definition patch while the agent is stopped or errored.
    /// The CAS on status rejects patches racing a concurrent start.
    ///
    /// The name column is stricter than the rest of the patch: it is
    /// immutable unless the agent is fully stopped, so the assignment
    /// below branches on `status = 'stopped'` rather than trusting the
    /// caller to have pre-filtered name patches.
    pub async fn update_definition(
        &self,
        id: i64,
        patch: AgentPatch,
    ) -> Result<Agent, StoreError> {
        let result = sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents
            SET name = CASE WHEN status = 'stopped' THEN COALESCE($2, name) ELSE name END,
                description = COALESCE($3, description),
                config = COALESCE($4, config),
                updated_at = now()
            WHERE id = $1 AND status = ANY($5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&patch.name)
        .bind(&patch.description)
        .bind(&patch.config)
        .bind(&REST_STATUSES[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, patch.name.as_deref().unwrap_or("")))?;

        match result {
            Some(agent) => Ok(agent),
            None => Err(self.cas_failure(id).await),
        }
    }

    /// Delete an agent at rest; logs and metrics cascade with the row
    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1 AND status = ANY($2)")
            .bind(id)
            .bind(&REST_STATUSES[..])
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.cas_failure(id).await);
        }
        Ok(())
    }

    /// Paginated listing with optional status/search filters.
    /// `owner_filter` restricts results to one creator (non-admin callers).
    pub async fn list(
        &self,
        query: &ListAgentsQuery,
        owner_filter: Option<i64>,
    ) -> Result<(Vec<Agent>, i64), StoreError> {
        let sort_column = match query.sort_by.as_deref() {
            Some("name") => "name",
            Some("status") => "status",
            _ => "created_at",
        };
        let sort_order = match query.sort_order.as_deref() {
            Some("asc") => "ASC",
            _ => "DESC",
        };

        let filter_sql = r#"
            WHERE ($1::agent_status IS NULL OR status = $1)
              AND ($2::bigint IS NULL OR created_by = $2)
              AND ($3::text IS NULL OR name ILIKE '%' || $3 || '%'
                   OR description ILIKE '%' || $3 || '%')
        "#;

        let rows = sqlx::query_as::<_, Agent>(&format!(
            "SELECT * FROM agents {filter_sql} ORDER BY {sort_column} {sort_order} LIMIT $4 OFFSET $5"
        ))
        .bind(query.status)
        .bind(owner_filter)
        .bind(&query.search)
        .bind(query.limit())
        .bind(query.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM agents {filter_sql}"))
            .bind(query.status)
            .bind(owner_filter)
            .bind(&query.search)
            .fetch_one(&self.pool)
            .await?;

        Ok((rows, total))
    }

    pub async fn count_by_status(&self) -> Result<Vec<StatusCount>, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM agents GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| StatusCount {
                status: row.get("status"),
                count: row.get("count"),
            })
            .collect())
    }

    /// All ports currently assigned inside [lo, hi]
    pub async fn ports_in_range(&self, lo: u16, hi: u16) -> Result<HashSet<u16>, StoreError> {
        let rows: Vec<i32> = sqlx::query_scalar(
            "SELECT port FROM agents WHERE port IS NOT NULL AND port BETWEEN $1 AND $2",
        )
        .bind(lo as i32)
        .bind(hi as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|p| p as u16).collect())
    }

    /// Running agents whose heartbeat is missing or older than `threshold`
    pub async fn find_stale_running(&self, threshold: Duration) -> Result<Vec<Agent>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::zero());

        let rows = sqlx::query_as::<_, Agent>(
            r#"
            SELECT * FROM agents
            WHERE status = 'running'
              AND (last_heartbeat IS NULL OR last_heartbeat < $1)
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Agents currently holding a pid or port (used by the shutdown drain)
    pub async fn list_live(&self) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE status = ANY($1)")
            .bind(&LIVE_STATUSES[..])
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Status CAS transitions. Each statement both moves the status and
    // repairs the dependent columns, so the row can never be observed
    // half-transitioned.
    // ------------------------------------------------------------------

    /// `stopped|error → starting`, claiming `port` in the same statement
    pub async fn begin_start(&self, id: i64, port: u16) -> Result<Agent, StoreError> {
        let result = sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents
            SET status = 'starting', port = $2, error_message = NULL, updated_at = now()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(port as i32)
        .bind(&REST_STATUSES[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_port_violation(e, port as i32))?;

        match result {
            Some(agent) => Ok(agent),
            None => Err(self.cas_failure(id).await),
        }
    }

    /// Record the spawned child's pid (written by the supervisor)
    pub async fn set_process_id(&self, id: i64, pid: u32) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE agents SET process_id = $2, updated_at = now()
             WHERE id = $1 AND status = 'starting'",
        )
        .bind(id)
        .bind(pid as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.cas_failure(id).await);
        }
        Ok(())
    }

    /// `starting → running`
    pub async fn mark_running(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE agents SET status = 'running', updated_at = now()
             WHERE id = $1 AND status = 'starting'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.cas_failure(id).await);
        }
        Ok(())
    }

    /// `running|starting → stopping`
    pub async fn begin_stop(&self, id: i64) -> Result<Agent, StoreError> {
        let result = sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents
            SET status = 'stopping', updated_at = now()
            WHERE id = $1 AND status IN ('running', 'starting')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match result {
            Some(agent) => Ok(agent),
            None => Err(self.cas_failure(id).await),
        }
    }

    /// Any live state → `stopped`, releasing pid and port.
    /// A clean manual stop also resets the restart counter.
    pub async fn finish_stop(&self, id: i64, reset_restarts: bool) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET status = 'stopped', process_id = NULL, port = NULL,
                error_message = NULL,
                restart_count = CASE WHEN $2 THEN 0 ELSE restart_count END,
                updated_at = now()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(reset_restarts)
        .bind(&LIVE_STATUSES[..])
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.cas_failure(id).await);
        }
        Ok(())
    }

    /// Any live state → `error`, releasing pid and port
    pub async fn mark_error(&self, id: i64, message: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET status = 'error', error_message = $2,
                process_id = NULL, port = NULL, updated_at = now()
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(message)
        .bind(&LIVE_STATUSES[..])
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.cas_failure(id).await);
        }
        Ok(())
    }

    /// Bump the automatic-restart counter, returning the new value
    pub async fn increment_restart_count(&self, id: i64) -> Result<i32, StoreError> {
        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE agents SET restart_count = restart_count + 1, updated_at = now()
             WHERE id = $1 RETURNING restart_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        count.ok_or(StoreError::NotFound(id))
    }

    /// Record a worker heartbeat. Accepted while starting or running; a
    /// beat racing a stop is dropped by the status condition.
    pub async fn touch_heartbeat(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE agents SET last_heartbeat = $2
             WHERE id = $1 AND status IN ('starting', 'running')",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Telemetry children
    // ------------------------------------------------------------------

    pub async fn append_log(&self, id: i64, level: &str, message: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO agent_logs (agent_id, level, message) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(level)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_metrics(
        &self,
        id: i64,
        memory: MemoryUsage,
        cpu: CpuUsage,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agent_metrics
                (agent_id, memory_rss, memory_heap_total, memory_heap_used, cpu_user, cpu_system)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(memory.rss)
        .bind(memory.heap_total)
        .bind(memory.heap_used)
        .bind(cpu.user)
        .bind(cpu.system)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_alert(
        &self,
        id: i64,
        alert_type: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO agent_alerts (agent_id, alert_type, message) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(alert_type)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// A zero-row CAS means either the row vanished or its status moved
    /// under us; tell the two apart for the caller.
    async fn cas_failure(&self, id: i64) -> StoreError {
        let exists: Result<Option<i64>, _> = sqlx::query_scalar("SELECT id FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

        match exists {
            Ok(Some(_)) => StoreError::StatusChanged(id),
            Ok(None) => StoreError::NotFound(id),
            Err(e) => StoreError::Database(e),
        }
    }
}

fn unique_constraint(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return Some(db_err.constraint().unwrap_or_default().to_string());
        }
    }
    None
}

fn map_unique_violation(err: sqlx::Error, name: &str) -> StoreError {
    match unique_constraint(&err) {
        Some(constraint) if constraint.contains("name") => {
            StoreError::NameConflict(name.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn map_port_violation(err: sqlx::Error, port: i32) -> StoreError {
    match unique_constraint(&err) {
        Some(constraint) if constraint.contains("port") => StoreError::PortConflict(port),
        _ => StoreError::Database(err),
    }
}
