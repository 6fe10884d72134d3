use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use stockledger_auth::Permission;
use stockledger_core::ProductId;
use stockledger_inventory::ChangeType;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/receive", post(receive))
        .route("/ship", post(ship))
        .route("/history", get(history))
        .route("/history/receiving", get(receiving_history))
        .route("/history/shipping", get(shipping_history))
        .route("/:product_id/locations", get(location_balances))
}

/// POST /stock/receive
pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::StockMovementRequest>, JsonRejection>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::STOCK_RECEIVE) {
        return errors::forbidden(e);
    }
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_body(rejection),
    };

    match services
        .ledger()
        .receive(body.product_id, body.location_id, body.quantity)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(dto::receive_to_json(&outcome))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// POST /stock/ship
pub async fn ship(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::StockMovementRequest>, JsonRejection>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::STOCK_SHIP) {
        return errors::forbidden(e);
    }
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_body(rejection),
    };

    match services
        .ledger()
        .ship(body.product_id, body.location_id, body.quantity)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(dto::ship_to_json(&outcome))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// GET /stock/:product_id/locations
pub async fn location_balances(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(product_id): Path<String>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::STOCK_READ) {
        return errors::forbidden(e);
    }
    let product_id: ProductId = match product_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_argument",
                "invalid product id",
            );
        }
    };

    match services.ledger().location_balances(product_id).await {
        Ok(balances) => (
            StatusCode::OK,
            Json(dto::LocationBalancesResponse::new(product_id, balances)),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// GET /stock/history?change_type=receive|ship
pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::HistoryQuery>, QueryRejection>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::STOCK_READ) {
        return errors::forbidden(e);
    }
    let Query(mut query) = match query {
        Ok(q) => q,
        Err(rejection) => return bad_query(rejection),
    };
    let change_type = match query.change_type.take() {
        Some(raw) => match raw.parse::<ChangeType>() {
            Ok(ct) => ct,
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_argument", e.to_string());
            }
        },
        None => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_argument",
                "change_type is required (receive or ship)",
            );
        }
    };

    history_for(&services, change_type, query).await
}

/// GET /stock/history/receiving
pub async fn receiving_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::HistoryQuery>, QueryRejection>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::STOCK_READ) {
        return errors::forbidden(e);
    }
    match query {
        Ok(Query(query)) => history_for(&services, ChangeType::Receive, query).await,
        Err(rejection) => bad_query(rejection),
    }
}

/// GET /stock/history/shipping
pub async fn shipping_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::HistoryQuery>, QueryRejection>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::STOCK_READ) {
        return errors::forbidden(e);
    }
    match query {
        Ok(Query(query)) => history_for(&services, ChangeType::Ship, query).await,
        Err(rejection) => bad_query(rejection),
    }
}

async fn history_for(
    services: &AppServices,
    change_type: ChangeType,
    query: dto::HistoryQuery,
) -> Response {
    let filter = query.into_filter(change_type);
    match services.ledger().history(&filter).await {
        Ok(events) => (
            StatusCode::OK,
            Json(dto::HistoryResponse::new(change_type, events)),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

fn bad_body(rejection: JsonRejection) -> Response {
    errors::json_error(
        StatusCode::BAD_REQUEST,
        "invalid_argument",
        rejection.body_text(),
    )
}

fn bad_query(rejection: QueryRejection) -> Response {
    errors::json_error(
        StatusCode::BAD_REQUEST,
        "invalid_argument",
        rejection.body_text(),
    )
}
