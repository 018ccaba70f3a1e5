//! Combines the route tables of every module into one API router.

use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(crate::queue::configure_queue_routes())
        .merge(crate::windows::configure_window_routes())
        .merge(crate::feedback::configure_feedback_routes())
        .merge(crate::analytics::configure_analytics_routes())
}
