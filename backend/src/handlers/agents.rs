use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::AppError;
use crate::handlers::{ApiResponse, Pagination};
use crate::models::{
    validate_config, CreateAgentRequest, ListAgentsQuery, StopAgentRequest, UpdateAgentRequest,
};
use crate::services::auth::AuthUser;
use crate::AppState;

/// POST /api/agents
///
/// Create an agent definition; it starts life stopped.
pub async fn create_agent(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<CreateAgentRequest>,
) -> Result<HttpResponse, AppError> {
    let agent = state
        .controller
        .create(&user.principal(), body.into_inner())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Created().json(ApiResponse::new(agent)))
}

/// GET /api/agents
///
/// Paginated listing, ownership-filtered for non-admin callers.
pub async fn list_agents(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<ListAgentsQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let (agents, total) = state
        .controller
        .list(&user.principal(), &query)
        .await
        .map_err(AppError::from)?;

    let pagination = Pagination::new(query.page(), query.limit(), total);
    Ok(HttpResponse::Ok().json(ApiResponse::paginated(agents, pagination)))
}

/// GET /api/agents/{id}
pub async fn get_agent(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let agent = state
        .controller
        .get(&user.principal(), path.into_inner())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(agent)))
}

/// PUT /api/agents/{id}
///
/// Definition changes are accepted only while the agent is at rest.
pub async fn update_agent(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
    body: web::Json<UpdateAgentRequest>,
) -> Result<HttpResponse, AppError> {
    let agent = state
        .controller
        .update(&user.principal(), path.into_inner(), body.into_inner())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(agent)))
}

/// DELETE /api/agents/{id}
pub async fn delete_agent(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    state
        .controller
        .delete(&user.principal(), id)
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(id, "Agent deleted")))
}

/// POST /api/agents/{id}/start
pub async fn start_agent(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let started = state
        .controller
        .start(&user.principal(), path.into_inner())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(started)))
}

/// POST /api/agents/{id}/stop
pub async fn stop_agent(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
    body: Option<web::Json<StopAgentRequest>>,
) -> Result<HttpResponse, AppError> {
    let force = body.map(|b| b.force).unwrap_or_default();
    let agent = state
        .controller
        .stop(&user.principal(), path.into_inner(), force)
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(agent)))
}

/// POST /api/agents/{id}/restart
pub async fn restart_agent(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let started = state
        .controller
        .restart(&user.principal(), path.into_inner())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(started)))
}

/// GET /api/agents/{id}/process
pub async fn get_process(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let info = state
        .controller
        .process_info(&user.principal(), path.into_inner())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(info)))
}

/// GET /api/agents/{id}/health
pub async fn get_health(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let health = state
        .controller
        .health(&user.principal(), path.into_inner())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(health)))
}

/// GET /api/agents/processes
pub async fn list_processes(
    state: web::Data<AppState>,
    user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let processes = state
        .controller
        .list_processes(&user.principal())
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::new(processes)))
}

/// GET /api/agents/stats
pub async fn get_stats(
    state: web::Data<AppState>,
    _user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let stats = state.controller.stats().await.map_err(AppError::from)?;
    Ok(HttpResponse::Ok().json(ApiResponse::new(stats)))
}

#[derive(Debug, Deserialize)]
pub struct ValidateConfigRequest {
    pub config: serde_json::Value,
}

/// POST /api/agents/validate-config
pub async fn validate_agent_config(
    _user: AuthUser,
    body: web::Json<ValidateConfigRequest>,
) -> Result<HttpResponse, AppError> {
    validate_config(&body.config).map_err(|errors| AppError::Validation(errors.join("; ")))?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        serde_json::json!({ "valid": true }),
        "Config is valid",
    )))
}

/// Configure agent routes.
///
/// Static paths are registered before `/{id}` so actix does not swallow
/// them as path parameters.
pub fn configure_agent_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/agents")
            .route("/processes", web::get().to(list_processes))
            .route("/stats", web::get().to(get_stats))
            .route("/validate-config", web::post().to(validate_agent_config))
            .route("", web::post().to(create_agent))
            .route("", web::get().to(list_agents))
            .route("/{id}", web::get().to(get_agent))
            .route("/{id}", web::put().to(update_agent))
            .route("/{id}", web::delete().to(delete_agent))
            .route("/{id}/start", web::post().to(start_agent))
            .route("/{id}/stop", web::post().to(stop_agent))
            .route("/{id}/restart", web::post().to(restart_agent))
            .route("/{id}/process", web::get().to(get_process))
            .route("/{id}/health", web::get().to(get_health)),
    );
}
