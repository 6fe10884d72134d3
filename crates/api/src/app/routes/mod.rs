use axum::{Router, routing::get};

pub mod products;
pub mod stock;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/stock", stock::router())
        .nest("/products", products::router())
}
