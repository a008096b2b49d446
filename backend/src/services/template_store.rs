//! Template persistence.
//!
//! Templates are defaulting sources for agent configs. They are never
//! hard-deleted once referenced; deactivation keeps history while the
//! partial unique index guarantees at most one active template per name.

use sqlx::PgPool;
use thiserror::Error;

use crate::models::{AgentTemplate, CreateTemplateRequest};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(i64),
    #[error("An active template named '{0}' already exists")]
    NameConflict(String),
    #[error("Invalid template version '{0}', expected x.y.z")]
    InvalidVersion(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Service for managing agent templates
#[derive(Debug, Clone)]
pub struct TemplateService {
    pool: PgPool,
}

impl TemplateService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        request: CreateTemplateRequest,
        created_by: i64,
    ) -> Result<AgentTemplate, TemplateError> {
        let version = request.version.unwrap_or_else(|| "1.0.0".to_string());
        validate_version(&version)?;

        let result = sqlx::query_as::<_, AgentTemplate>(
            r#"
            INSERT INTO agent_templates (name, description, config, version, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.config)
        .bind(&version)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await;

        result.map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                TemplateError::NameConflict(request.name.clone())
            }
            _ => TemplateError::Database(e),
        })
    }

    pub async fn get(&self, id: i64) -> Result<AgentTemplate, TemplateError> {
        sqlx::query_as::<_, AgentTemplate>("SELECT * FROM agent_templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TemplateError::NotFound(id))
    }

    /// Fetch an active template for use at agent creation
    pub async fn get_active(&self, id: i64) -> Result<AgentTemplate, TemplateError> {
        sqlx::query_as::<_, AgentTemplate>(
            "SELECT * FROM agent_templates WHERE id = $1 AND is_active",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TemplateError::NotFound(id))
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<AgentTemplate>, TemplateError> {
        let rows = sqlx::query_as::<_, AgentTemplate>(
            "SELECT * FROM agent_templates WHERE is_active OR $1 ORDER BY name, created_at DESC",
        )
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Soft-deactivate. Agents referencing the template keep their merged
    /// config; the name becomes free for a replacement.
    pub async fn deactivate(&self, id: i64) -> Result<(), TemplateError> {
        let result = sqlx::query(
            "UPDATE agent_templates SET is_active = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TemplateError::NotFound(id));
        }
        Ok(())
    }
}

fn validate_version(version: &str) -> Result<(), TemplateError> {
    let mut parts = version.split('.');
    let valid = (0..3).all(|_| {
        parts
            .next()
            .is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    }) && parts.next().is_none();

    if valid {
        Ok(())
    } else {
        Err(TemplateError::InvalidVersion(version.to_string()))
    }
}
