pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::post;
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analyze-image", post(handlers::analyze_image))
        .route("/analyze-text", post(handlers::analyze_text))
        .route("/chat", post(handlers::chat))
}
