use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

/// Application-level error type
#[derive(Debug)]
pub enum AppError {
    /// Database error
    Database(sqlx::Error),
    /// Validation error (bad input, or an agent in the wrong state for the
    /// requested transition)
    Validation(String),
    /// Not found error
    NotFound(String),
    /// Conflict error (duplicate name, username, email)
    Conflict(String),
    /// Authentication error
    Unauthorized(String),
    /// Principal lacks the role or ownership for the operation
    Forbidden(String),
    /// No port left in the configured allocation range
    ResourceExhausted(String),
    /// Internal server error
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl ErrorResponse {
    fn new(error: String) -> Self {
        Self {
            success: false,
            error,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {e}"),
            Self::Validation(msg) => write!(f, "Validation error: {msg}"),
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::Conflict(msg) => write!(f, "Conflict: {msg}"),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Self::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            Self::ResourceExhausted(msg) => write!(f, "Resource exhausted: {msg}"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let body = ErrorResponse::new(self.to_string());

        match self {
            Self::Database(_) | Self::Internal(_) => {
                HttpResponse::InternalServerError().json(body)
            }
            Self::Validation(_) => HttpResponse::BadRequest().json(body),
            Self::NotFound(_) => HttpResponse::NotFound().json(body),
            Self::Conflict(_) => HttpResponse::Conflict().json(body),
            Self::Unauthorized(_) => HttpResponse::Unauthorized().json(body),
            Self::Forbidden(_) => HttpResponse::Forbidden().json(body),
            Self::ResourceExhausted(_) => HttpResponse::ServiceUnavailable().json(body),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}
