pub mod data;
pub mod ingest;
pub mod root;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(root::router())
        .merge(ingest::router())
        .nest("/data", data::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
