//! In-flight request accounting for the health endpoint.

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::state::AppState;

/// Decrements the counter when the request finishes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Count requests currently being served
pub async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let _in_flight = InFlight::enter(&state.active_requests);
    next.run(request).await
}
