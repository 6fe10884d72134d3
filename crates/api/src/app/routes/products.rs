use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use stockledger_auth::Permission;
use stockledger_core::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_stock_levels).post(create_product))
        .route("/low-stock", get(low_stock))
        .route("/:id", get(get_stock_level))
}

/// POST /products
pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateProductRequest>, JsonRejection>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::PRODUCTS_WRITE) {
        return errors::forbidden(e);
    }
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_argument",
                rejection.body_text(),
            );
        }
    };

    match services
        .ledger()
        .register_product(&body.name, body.safety_stock)
        .await
    {
        Ok(product) => (StatusCode::CREATED, Json(product)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// GET /products
pub async fn list_stock_levels(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::PRODUCTS_READ) {
        return errors::forbidden(e);
    }

    match services.ledger().stock_levels().await {
        Ok(levels) => {
            let items: Vec<_> = levels.iter().map(dto::stock_level_to_json).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "count": items.len(), "products": items })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// GET /products/low-stock
///
/// Products that are out of stock or below their safety stock.
pub async fn low_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::PRODUCTS_READ) {
        return errors::forbidden(e);
    }

    match services.ledger().low_stock().await {
        Ok(levels) => {
            let items: Vec<_> = levels.iter().map(dto::stock_level_to_json).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "count": items.len(), "products": items })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// GET /products/:id
pub async fn get_stock_level(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::PRODUCTS_READ) {
        return errors::forbidden(e);
    }
    let product_id: ProductId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_argument",
                "invalid product id",
            );
        }
    };

    match services.ledger().stock_level(product_id).await {
        Ok(level) => (StatusCode::OK, Json(dto::stock_level_to_json(&level))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
