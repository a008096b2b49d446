//! HTTP integration tests for the agent endpoints.
//!
//! These exercise the controller's CRUD, ownership, and validation paths
//! end-to-end via HTTP. Run with:
//! `cargo test agents_http_tests -- --ignored` (requires `DATABASE_URL`
//! pointing at a migrated database).

#[cfg(test)]
mod http_integration_tests {
    use std::sync::Arc;

    use actix_web::{test, web, App};
    use sqlx::PgPool;

    use crate::handlers::{configure_agent_routes, configure_auth_routes, configure_template_routes};
    use crate::models::{RegisterRequest, UserRole};
    use crate::services::{
        AgentController, AgentStore, AuthService, ControllerConfig, PortAllocator,
        ProcessSupervisor, SupervisorConfig, TemplateService,
    };
    use crate::{AppState, Config};

    /// Helper to create a test database pool - returns None if connection fails
    async fn try_create_test_pool() -> Option<PgPool> {
        let _ = dotenvy::from_filename("backend/.env");
        let _ = dotenvy::dotenv();

        let database_url = std::env::var("DATABASE_URL").ok()?;

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .ok()
    }

    fn test_config() -> Config {
        Config {
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            database_max_connections: 5,
            host: "127.0.0.1".to_string(),
            port: 8080,
            jwt_secret: "test-secret".to_string(),
            jwt_expires_in_secs: 3600,
            jwt_refresh_expires_in_secs: 86400,
            agent_port_min: 3001,
            agent_port_max: 3100,
            agent_worker_path: "/bin/true".into(),
            heartbeat_interval: std::time::Duration::from_secs(30),
            ready_timeout: std::time::Duration::from_secs(30),
            grace_timeout: std::time::Duration::from_secs(2),
            max_restarts: 3,
            restart_backoff: std::time::Duration::from_secs(1),
            shutdown_timeout: std::time::Duration::from_secs(5),
        }
    }

    fn build_controller(pool: PgPool, config: &Config) -> Arc<AgentController> {
        let store = AgentStore::new(pool.clone());
        let templates = TemplateService::new(pool.clone());
        let allocator =
            PortAllocator::new(store.clone(), config.agent_port_min, config.agent_port_max);
        let (supervisor, exit_rx) = ProcessSupervisor::new(
            SupervisorConfig {
                worker_path: config.agent_worker_path.clone(),
                ready_timeout: config.ready_timeout,
                grace_timeout: config.grace_timeout,
                heartbeat_interval: config.heartbeat_interval,
            },
            Arc::new(store.clone()),
        );

        let controller = Arc::new(AgentController::new(
            store,
            templates,
            allocator,
            Arc::new(supervisor),
            ControllerConfig {
                max_restarts: config.max_restarts,
                restart_backoff: config.restart_backoff,
                heartbeat_interval: config.heartbeat_interval,
                shutdown_timeout: config.shutdown_timeout,
            },
        ));
        let _ = controller.clone().spawn_recovery_loop(exit_rx);
        controller
    }

    struct TestHarness {
        auth: AuthService,
        app_state: web::Data<AppState>,
        auth_data: web::Data<AuthService>,
        templates_data: web::Data<TemplateService>,
    }

    async fn build_harness(pool: PgPool) -> TestHarness {
        let config = test_config();
        let controller = build_controller(pool.clone(), &config);
        let auth = AuthService::new(pool.clone(), &config);

        TestHarness {
            auth: auth.clone(),
            app_state: web::Data::new(AppState {
                db: pool.clone(),
                config,
                controller,
            }),
            auth_data: web::Data::new(auth),
            templates_data: web::Data::new(TemplateService::new(pool)),
        }
    }

    macro_rules! test_app {
        ($harness:expr) => {
            test::init_service(
                App::new()
                    .app_data($harness.app_state.clone())
                    .app_data($harness.auth_data.clone())
                    .app_data($harness.templates_data.clone())
                    .service(
                        web::scope("/api")
                            .configure(configure_auth_routes)
                            .configure(configure_agent_routes)
                            .configure(configure_template_routes),
                    ),
            )
            .await
        };
    }

    fn unique_name(prefix: &str) -> String {
        format!("{prefix}-{}", &uuid::Uuid::new_v4().to_string()[..8])
    }

    /// Register a user with the given role; returns (user_id, bearer token)
    async fn register_user(harness: &TestHarness, role: UserRole) -> (i64, String) {
        let username = unique_name("agents-http");
        let (profile, tokens) = harness
            .auth
            .register(RegisterRequest {
                username: username.clone(),
                email: format!("{username}@example.com"),
                password: "super-secret-pw".to_string(),
                role: Some(role),
            })
            .await
            .expect("registration should succeed");
        (profile.id, tokens.access_token)
    }

    async fn cleanup_agent(pool: &PgPool, name: &str) {
        let _ = sqlx::query("DELETE FROM agents WHERE name = $1")
            .bind(name)
            .execute(pool)
            .await;
    }

    async fn cleanup_user(pool: &PgPool, id: i64) {
        let _ = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await;
    }

    #[ignore]
    #[actix_rt::test]
    async fn agent_crud_flow() {
        let pool = match try_create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test: database not available");
                return;
            }
        };
        let harness = build_harness(pool.clone()).await;
        let app = test_app!(harness);

        let (owner_id, token) = register_user(&harness, UserRole::Operator).await;
        let name = unique_name("crud-agent");
        let bearer = format!("Bearer {token}");

        // Create
        let req = test::TestRequest::post()
            .uri("/api/agents")
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({
                "name": name,
                "config": {"model": "m-a", "temperature": 0.5},
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["status"], "stopped");
        assert!(body["data"]["port"].is_null());
        assert!(body["data"]["processId"].is_null());
        let agent_id = body["data"]["id"].as_i64().unwrap();

        // Duplicate name
        let req = test::TestRequest::post()
            .uri("/api/agents")
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({
                "name": name,
                "config": {"model": "m-a"},
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 409);

        // Invalid config
        let req = test::TestRequest::post()
            .uri("/api/agents")
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({
                "name": unique_name("bad-config"),
                "config": {"model": "m", "temperature": 2.5},
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        // Get
        let req = test::TestRequest::get()
            .uri(&format!("/api/agents/{agent_id}"))
            .insert_header(("Authorization", bearer.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        // Update while stopped
        let req = test::TestRequest::put()
            .uri(&format!("/api/agents/{agent_id}"))
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({
                "description": "updated description",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["description"], "updated description");

        // List includes it
        let req = test::TestRequest::get()
            .uri("/api/agents?limit=100")
            .insert_header(("Authorization", bearer.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["pagination"]["total"].as_i64().unwrap() >= 1);

        // Stop without force on a stopped agent is a state error
        let req = test::TestRequest::post()
            .uri(&format!("/api/agents/{agent_id}/stop"))
            .insert_header(("Authorization", bearer.clone()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        // Delete
        let req = test::TestRequest::delete()
            .uri(&format!("/api/agents/{agent_id}"))
            .insert_header(("Authorization", bearer.clone()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        // Gone
        let req = test::TestRequest::get()
            .uri(&format!("/api/agents/{agent_id}"))
            .insert_header(("Authorization", bearer.clone()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        cleanup_agent(&pool, &name).await;
        cleanup_user(&pool, owner_id).await;
    }

    #[ignore]
    #[actix_rt::test]
    async fn ownership_gates_non_admin_access() {
        let pool = match try_create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test: database not available");
                return;
            }
        };
        let harness = build_harness(pool.clone()).await;
        let app = test_app!(harness);

        let (owner_id, owner_token) = register_user(&harness, UserRole::Operator).await;
        let (viewer_id, viewer_token) = register_user(&harness, UserRole::Viewer).await;
        let (admin_id, admin_token) = register_user(&harness, UserRole::Admin).await;

        let name = unique_name("owned-agent");
        let req = test::TestRequest::post()
            .uri("/api/agents")
            .insert_header(("Authorization", format!("Bearer {owner_token}")))
            .set_json(serde_json::json!({
                "name": name,
                "config": {"model": "m-a"},
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let agent_id = body["data"]["id"].as_i64().unwrap();

        // A different non-admin user cannot see it
        let req = test::TestRequest::get()
            .uri(&format!("/api/agents/{agent_id}"))
            .insert_header(("Authorization", format!("Bearer {viewer_token}")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);

        // A viewer cannot create agents at all
        let req = test::TestRequest::post()
            .uri("/api/agents")
            .insert_header(("Authorization", format!("Bearer {viewer_token}")))
            .set_json(serde_json::json!({
                "name": unique_name("viewer-agent"),
                "config": {"model": "m-a"},
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);

        // Admin bypasses ownership
        let req = test::TestRequest::get()
            .uri(&format!("/api/agents/{agent_id}"))
            .insert_header(("Authorization", format!("Bearer {admin_token}")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        // Listing hides other users' agents from non-admins
        let req = test::TestRequest::get()
            .uri("/api/agents?limit=100")
            .insert_header(("Authorization", format!("Bearer {viewer_token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        let rows = body["data"].as_array().unwrap();
        assert!(rows.iter().all(|row| row["name"] != serde_json::json!(name)));

        cleanup_agent(&pool, &name).await;
        for id in [owner_id, viewer_id, admin_id] {
            cleanup_user(&pool, id).await;
        }
    }

    #[ignore]
    #[actix_rt::test]
    async fn template_merge_on_create() {
        let pool = match try_create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test: database not available");
                return;
            }
        };
        let harness = build_harness(pool.clone()).await;
        let app = test_app!(harness);

        let (user_id, token) = register_user(&harness, UserRole::Operator).await;
        let bearer = format!("Bearer {token}");
        let template_name = unique_name("tmpl");

        // Create a template
        let req = test::TestRequest::post()
            .uri("/api/templates")
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({
                "name": template_name,
                "config": {"model": "m", "temperature": 0.7, "max_tokens": 1000},
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let template_id = body["data"]["id"].as_i64().unwrap();

        // Agent created from it merges user overrides on top
        let agent_name = unique_name("tmpl-agent");
        let req = test::TestRequest::post()
            .uri("/api/agents")
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({
                "name": agent_name,
                "templateId": template_id,
                "config": {"temperature": 0.2},
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(
            body["data"]["config"],
            serde_json::json!({"model": "m", "temperature": 0.2, "max_tokens": 1000})
        );

        // Unknown template is a 404
        let req = test::TestRequest::post()
            .uri("/api/agents")
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({
                "name": unique_name("no-tmpl"),
                "templateId": 999_999_999,
                "config": {"model": "m"},
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        cleanup_agent(&pool, &agent_name).await;
        let _ = sqlx::query("DELETE FROM agent_templates WHERE id = $1")
            .bind(template_id)
            .execute(&pool)
            .await;
        cleanup_user(&pool, user_id).await;
    }

    #[ignore]
    #[actix_rt::test]
    async fn validate_config_and_stats_endpoints() {
        let pool = match try_create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test: database not available");
                return;
            }
        };
        let harness = build_harness(pool.clone()).await;
        let app = test_app!(harness);

        let (user_id, token) = register_user(&harness, UserRole::Viewer).await;
        let bearer = format!("Bearer {token}");

        let req = test::TestRequest::post()
            .uri("/api/agents/validate-config")
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({"config": {"model": "m", "max_tokens": 32000}}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        let req = test::TestRequest::post()
            .uri("/api/agents/validate-config")
            .insert_header(("Authorization", bearer.clone()))
            .set_json(serde_json::json!({"config": {"max_tokens": 0}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);

        let req = test::TestRequest::get()
            .uri("/api/agents/stats")
            .insert_header(("Authorization", bearer.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["data"]["total"].as_i64().is_some());

        // Viewer cannot list processes (operator+)
        let req = test::TestRequest::get()
            .uri("/api/agents/processes")
            .insert_header(("Authorization", bearer))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 403);

        cleanup_user(&pool, user_id).await;
    }
}
