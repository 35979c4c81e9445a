//! HTTP server implementation using Axum.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use cloudclaw_control::ControlBot;
use cloudclaw_core::config::GatewayConfig;
use cloudclaw_scheduler::TaskScheduler;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub start_time: std::time::Instant,
    /// Recurring provisioning scheduler.
    pub scheduler: TaskScheduler,
    /// Telegram control bot.
    pub bot: ControlBot,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        // Provisioning tasks
        .route("/api/v1/tasks", get(routes::list_tasks).post(routes::add_task))
        .route(
            "/api/v1/tasks/{id}",
            get(routes::get_task).delete(routes::delete_task),
        )
        .route("/api/v1/tasks/{id}/start", post(routes::start_task))
        .route("/api/v1/tasks/{id}/stop", post(routes::stop_task))
        .route("/api/v1/tasks/{id}/execute", post(routes::execute_task))
        .route(
            "/api/v1/tasks/{id}/logs",
            get(routes::get_logs).delete(routes::clear_logs),
        )
        // Telegram control bot
        .route(
            "/api/v1/telegram/config",
            get(routes::telegram_get_config).post(routes::telegram_update_config),
        )
        .route("/api/v1/telegram/test", post(routes::telegram_test))
        .route("/api/v1/telegram/send", post(routes::telegram_send))
        .route("/api/v1/telegram/start", post(routes::telegram_start))
        .route("/api/v1/telegram/stop", post(routes::telegram_stop))
        .route("/api/v1/telegram/status", get(routes::telegram_status))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

fn cors_layer() -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    // Example: CLOUDCLAW_CORS_ORIGINS=https://panel.example.com,https://ops.example.com
    if let Ok(origins_str) = std::env::var("CLOUDCLAW_CORS_ORIGINS") {
        let origins: Vec<_> = origins_str
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins)
    } else {
        cors.allow_origin(Any)
    }
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.gateway_config.host, state.gateway_config.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
