pub mod agent;
pub mod agent_config;
pub mod template;
pub mod user;

pub use agent::*;
pub use agent_config::*;
pub use template::*;
pub use user::*;
