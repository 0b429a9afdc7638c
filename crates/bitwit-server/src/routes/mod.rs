//! API route modules.

pub mod health;
pub mod logs;
pub mod reset;
pub mod runs;
pub mod settings;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::track_requests;
use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .merge(settings::router())
        .merge(runs::router())
        .merge(logs::router())
        .merge(reset::router());

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        // Dashboard is served from another origin
        .layer(CorsLayer::permissive())
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::testing::send;
    use super::*;
    use crate::state::test_support::{test_state, CountingPipeline};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(dir.path(), Arc::new(CountingPipeline::default())));

        let (status, _) = send(&router, Method::GET, "/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_request_counter_returns_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), Arc::new(CountingPipeline::default()));
        let router = create_router(state.clone());

        send(&router, Method::GET, "/api/get_config", None).await;
        assert_eq!(
            state.active_requests.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }
}
