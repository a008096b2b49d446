use std::sync::Arc;

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentd::services::{
    AgentController, AgentStore, AuthService, ControllerConfig, HealthMonitor,
    HealthMonitorConfig, PortAllocator, ProcessSupervisor, SupervisorConfig, TemplateService,
};
use agentd::{AppState, Config};

/// Supervisor liveness endpoint (unauthenticated)
async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "agentd"
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentd=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");

    info!("Starting agentd on {}:{}", config.host, config.port);

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");

    info!("Database migrations completed");

    let store = AgentStore::new(db_pool.clone());
    let templates = TemplateService::new(db_pool.clone());
    let auth = AuthService::new(db_pool.clone(), &config);
    let allocator = PortAllocator::new(store.clone(), config.agent_port_min, config.agent_port_max);

    let (supervisor, exit_rx) = ProcessSupervisor::new(
        SupervisorConfig {
            worker_path: config.agent_worker_path.clone(),
            ready_timeout: config.ready_timeout,
            grace_timeout: config.grace_timeout,
            heartbeat_interval: config.heartbeat_interval,
        },
        Arc::new(store.clone()),
    );
    let supervisor = Arc::new(supervisor);

    let controller = Arc::new(AgentController::new(
        store.clone(),
        templates.clone(),
        allocator,
        supervisor.clone(),
        ControllerConfig {
            max_restarts: config.max_restarts,
            restart_backoff: config.restart_backoff,
            heartbeat_interval: config.heartbeat_interval,
            shutdown_timeout: config.shutdown_timeout,
        },
    ));

    // Crash recovery policy lives in the controller's recovery loop
    let _recovery = controller.clone().spawn_recovery_loop(exit_rx);
    info!("Recovery loop started");

    // Start the stale-heartbeat sweep
    let monitor = HealthMonitor::new(
        store.clone(),
        controller.clone(),
        HealthMonitorConfig {
            heartbeat_interval: config.heartbeat_interval,
            enabled: true,
        },
    );
    let monitor_shutdown = monitor.start();
    info!("Health monitor started");

    let app_state = web::Data::new(AppState {
        db: db_pool.clone(),
        config: config.clone(),
        controller: controller.clone(),
    });
    let auth_data = web::Data::new(auth);
    let templates_data = web::Data::new(templates);

    let server_addr = format!("{}:{}", config.host, config.port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(auth_data.clone())
            .app_data(templates_data.clone())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api")
                    .configure(agentd::handlers::configure_auth_routes)
                    .configure(agentd::handlers::configure_agent_routes)
                    .configure(agentd::handlers::configure_template_routes),
            )
    })
    .bind(&server_addr)?
    .run();

    let server_handle = server.handle();

    // On SIGTERM or ctrl-c: refuse new starts, drain every live agent,
    // then stop accepting HTTP traffic.
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");

        controller.shutdown().await;
        let _ = monitor_shutdown.send(true);
        server_handle.stop(true).await;
    });

    server.await
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
