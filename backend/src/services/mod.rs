pub mod agent_store;
pub mod auth;
pub mod controller;
pub mod health_monitor;
pub mod port_allocator;
pub mod supervisor;
pub mod template_store;

pub use agent_store::{AgentPatch, AgentStore, NewAgent, StoreError};
pub use auth::{AuthService, AuthUser, Claims};
pub use controller::{AgentController, ControllerConfig, ControllerError};
pub use health_monitor::{HealthMonitor, HealthMonitorConfig};
pub use port_allocator::{PortAllocator, PortError};
pub use supervisor::{
    ExitNotice, ProcessSnapshot, ProcessSupervisor, SupervisorConfig, SupervisorError,
    TelemetrySink,
};
pub use template_store::{TemplateError, TemplateService};
