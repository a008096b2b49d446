use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::handlers::ApiResponse;
use crate::models::{CreateTemplateRequest, ListTemplatesQuery, UserRole};
use crate::services::auth::AuthUser;
use crate::services::template_store::{TemplateError, TemplateService};

impl From<TemplateError> for AppError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound(id) => AppError::NotFound(format!("Template not found: {id}")),
            TemplateError::NameConflict(name) => {
                AppError::Conflict(format!("An active template named '{name}' already exists"))
            }
            TemplateError::InvalidVersion(v) => {
                AppError::Validation(format!("invalid template version '{v}', expected x.y.z"))
            }
            TemplateError::Database(e) => AppError::Database(e),
        }
    }
}

/// POST /api/templates
pub async fn create_template(
    templates: web::Data<TemplateService>,
    user: AuthUser,
    body: web::Json<CreateTemplateRequest>,
) -> Result<HttpResponse, AppError> {
    user.require_role(UserRole::Operator)?;

    let template = templates
        .create(body.into_inner(), user.user_id)
        .await
        .map_err(AppError::from)?;

    Ok(HttpResponse::Created().json(ApiResponse::new(template)))
}

/// GET /api/templates
pub async fn list_templates(
    templates: web::Data<TemplateService>,
    _user: AuthUser,
    query: web::Query<ListTemplatesQuery>,
) -> Result<HttpResponse, AppError> {
    let rows = templates.list(query.all).await.map_err(AppError::from)?;
    Ok(HttpResponse::Ok().json(ApiResponse::new(rows)))
}

/// GET /api/templates/{id}
pub async fn get_template(
    templates: web::Data<TemplateService>,
    _user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let template = templates
        .get(path.into_inner())
        .await
        .map_err(AppError::from)?;
    Ok(HttpResponse::Ok().json(ApiResponse::new(template)))
}

/// DELETE /api/templates/{id}
///
/// Templates deactivate rather than disappear; agents keep their merged
/// configs and history stays queryable.
pub async fn delete_template(
    templates: web::Data<TemplateService>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    user.require_role(UserRole::Operator)?;

    let id = path.into_inner();
    templates.deactivate(id).await.map_err(AppError::from)?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(id, "Template deactivated")))
}

/// Configure template routes
pub fn configure_template_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/templates")
            .route("", web::post().to(create_template))
            .route("", web::get().to(list_templates))
            .route("/{id}", web::get().to(get_template))
            .route("/{id}", web::delete().to(delete_template)),
    );
}
