//! Authentication and session management.
//!
//! Access tokens are short-lived JWTs signed with `JWT_SECRET`; refresh
//! tokens are opaque and persisted in `user_sessions` so they can be
//! revoked. Passwords are stored as hex-encoded SHA-256 digests and
//! compared in constant time.

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    AccessToken, LoginRequest, Principal, RegisterRequest, TokenPair, User, UserProfile, UserRole,
};

/// Errors that can occur during authentication
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Account is deactivated")]
    Inactive,
    #[error("Username or email already registered")]
    UserExists,
    #[error("User not found")]
    UserNotFound,
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Access-token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    pub username: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
}

/// Authentication service backed by the `users` and `user_sessions` tables
#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl AuthService {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self {
            pool,
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_ttl_secs: config.jwt_expires_in_secs,
            refresh_ttl_secs: config.jwt_refresh_expires_in_secs,
        }
    }

    /// Register a new user and hand out an initial token pair
    pub async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<(UserProfile, TokenPair), AuthError> {
        validate_registration(&request)?;

        let password_hash = hash_password(&request.password);
        let role = request.role.unwrap_or_default();

        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&request.username)
        .bind(&request.email)
        .bind(&password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await;

        let user = result.map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                AuthError::UserExists
            }
            _ => AuthError::Database(e),
        })?;

        let tokens = self.issue_tokens(&user).await?;
        Ok((user.into(), tokens))
    }

    pub async fn login(&self, request: LoginRequest) -> Result<TokenPair, AuthError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(&request.username)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(&request.password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        self.issue_tokens(&user).await
    }

    /// Exchange a stored refresh token for a fresh access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM users u
            JOIN user_sessions s ON s.user_id = u.id
            WHERE s.refresh_token = $1 AND s.expires_at > now()
            "#,
        )
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::InvalidToken)?;

        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        Ok(AccessToken {
            access_token: self.encode_access_token(&user)?,
            expires_in: self.access_ttl_secs,
        })
    }

    pub async fn profile(&self, user_id: i64) -> Result<UserProfile, AuthError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        Ok(user.into())
    }

    /// Validate a bearer token and return its claims
    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })
    }

    async fn issue_tokens(&self, user: &User) -> Result<TokenPair, AuthError> {
        let refresh_token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + ChronoDuration::seconds(self.refresh_ttl_secs as i64);

        sqlx::query(
            "INSERT INTO user_sessions (user_id, refresh_token, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user.id)
        .bind(&refresh_token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(TokenPair {
            access_token: self.encode_access_token(user)?,
            refresh_token,
            expires_in: self.access_ttl_secs,
        })
    }

    fn encode_access_token(&self, user: &User) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + ChronoDuration::seconds(self.access_ttl_secs as i64)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }
}

/// Hash a password using SHA-256
pub fn hash_password(password: &str) -> String {
    let hash = Sha256::digest(password.as_bytes());
    hex::encode(hash)
}

/// Verify a password against the stored hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    constant_time_eq(&hash_password(password), stored_hash)
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

fn validate_registration(request: &RegisterRequest) -> Result<(), AuthError> {
    let name = &request.username;
    if name.len() < 3 || name.len() > 64 {
        return Err(AuthError::Validation(
            "username must be 3-64 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AuthError::Validation(
            "username may only contain alphanumeric characters, hyphens, and underscores"
                .to_string(),
        ));
    }
    if !request.email.contains('@') {
        return Err(AuthError::Validation("invalid email address".to_string()));
    }
    if request.password.len() < 8 {
        return Err(AuthError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::TokenExpired | AuthError::InvalidToken => {
                AppError::Unauthorized(err.to_string())
            }
            AuthError::Inactive => AppError::Forbidden(err.to_string()),
            AuthError::UserExists => AppError::Conflict(err.to_string()),
            AuthError::UserNotFound => AppError::NotFound(err.to_string()),
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::Database(e) => AppError::Database(e),
        }
    }
}

// ============================================================================
// Principal extraction
// ============================================================================

/// Authenticated caller, extracted from the `Authorization: Bearer` header.
///
/// Usage in handlers:
/// ```rust,ignore
/// pub async fn protected_handler(
///     user: AuthUser,  // extraction fails with 401 on a bad token
/// ) -> Result<HttpResponse, AppError> {
///     // user.principal() carries id and role
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.user_id,
            role: self.role,
        }
    }

    /// Reject callers below `required` in the role hierarchy
    pub fn require_role(&self, required: UserRole) -> Result<(), AppError> {
        if self.role.at_least(required) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "requires {} role",
                required.as_str()
            )))
        }
    }
}

/// Extract Bearer token from the Authorization header
///
/// Expected format: "Bearer <token>"
fn extract_bearer_token(req: &HttpRequest) -> Option<String> {
    let auth_header = req.headers().get("Authorization")?;
    let auth_str = auth_header.to_str().ok()?;

    if auth_str.len() > 7 && auth_str[..7].eq_ignore_ascii_case("Bearer ") {
        Some(auth_str[7..].to_string())
    } else {
        None
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();

        Box::pin(async move {
            let auth = req
                .app_data::<web::Data<AuthService>>()
                .ok_or_else(|| {
                    tracing::error!("AuthService not configured in app data");
                    actix_web::Error::from(AppError::Internal(
                        "authentication service not configured".to_string(),
                    ))
                })?;

            let token = extract_bearer_token(&req).ok_or_else(|| {
                actix_web::Error::from(AppError::Unauthorized(
                    "missing bearer token".to_string(),
                ))
            })?;

            let claims = auth
                .verify_access(&token)
                .map_err(|e| actix_web::Error::from(AppError::from(e)))?;

            Ok(AuthUser {
                user_id: claims.sub,
                username: claims.username,
                role: claims.role,
            })
        })
    }
}
