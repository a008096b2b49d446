use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Reusable config defaulting source for agents
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AgentTemplate {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub config: serde_json::Value,
    /// Semver "x.y.z"
    pub version: String,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for template creation
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub description: Option<String>,
    pub config: serde_json::Value,
    #[serde(default)]
    pub version: Option<String>,
}

/// Query parameters for the template list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTemplatesQuery {
    /// Include deactivated templates
    #[serde(default)]
    pub all: bool,
}
