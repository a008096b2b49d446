use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::handlers::ApiResponse;
use crate::models::{LoginRequest, RefreshRequest, RegisterRequest};
use crate::services::auth::{AuthService, AuthUser};

/// POST /api/auth/register
///
/// Create a user account and hand out the initial token pair.
pub async fn register(
    auth: web::Data<AuthService>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let (profile, tokens) = auth.register(body.into_inner()).await.map_err(AppError::from)?;

    Ok(HttpResponse::Created().json(ApiResponse::new(serde_json::json!({
        "user": profile,
        "tokens": tokens,
    }))))
}

/// POST /api/auth/login
pub async fn login(
    auth: web::Data<AuthService>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let tokens = auth.login(body.into_inner()).await.map_err(AppError::from)?;
    Ok(HttpResponse::Ok().json(ApiResponse::new(tokens)))
}

/// POST /api/auth/refresh
pub async fn refresh(
    auth: web::Data<AuthService>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, AppError> {
    let token = auth
        .refresh(&body.refresh_token)
        .await
        .map_err(AppError::from)?;
    Ok(HttpResponse::Ok().json(ApiResponse::new(token)))
}

/// GET /api/auth/profile
pub async fn profile(
    auth: web::Data<AuthService>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let profile = auth.profile(user.user_id).await.map_err(AppError::from)?;
    Ok(HttpResponse::Ok().json(ApiResponse::new(profile)))
}

/// Configure auth routes
pub fn configure_auth_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/refresh", web::post().to(refresh))
            .route("/profile", web::get().to(profile)),
    );
}
