pub mod agents;
pub mod auth;
pub mod templates;

#[cfg(test)]
mod agents_http_tests;


pub use agents::configure_agent_routes;
pub use auth::configure_auth_routes;
pub use templates::configure_template_routes;

use serde::Serialize;

/// Uniform response envelope for every endpoint
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            pagination: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(data)
        }
    }

    pub fn paginated(data: T, pagination: Pagination) -> Self {
        Self {
            pagination: Some(pagination),
            ..Self::new(data)
        }
    }
}

/// Page descriptor attached to list responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total == 0 { 1 } else { (total + limit - 1) / limit };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}
