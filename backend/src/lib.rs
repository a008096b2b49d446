//! agentd - multi-tenant agent process supervisor
//!
//! This library provides the store, lifecycle controller, process
//! supervisor, and REST control plane for managing long-running agent
//! worker processes on a single host.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::AppError;

// Re-export specific items to avoid ambiguous glob re-exports
pub use models::{
    Agent, AgentHealth, AgentStats, AgentStatus, AgentTemplate, CreateAgentRequest, ProcessInfo,
    StartResponse, UpdateAgentRequest, UserRole,
};

pub use services::{
    AgentController, AgentStore, AuthService, ControllerConfig, HealthMonitor,
    HealthMonitorConfig, PortAllocator, ProcessSupervisor, SupervisorConfig, TemplateService,
};

/// Application state shared across handlers
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Config,
    pub controller: Arc<AgentController>,
}
