use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use stockledger_auth::Permission;

use crate::app::errors;
use crate::app::services::{self, AppServices};
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "principal_id": principal.principal_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "permissions": principal.permissions(),
    }))
}

/// GET /stream
///
/// Server-Sent Events feed of committed stock events (`stock.received`,
/// `stock.shipped`), each carrying the ledger entry as JSON.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = crate::authz::authorize_request(&principal, &Permission::STOCK_READ) {
        return errors::forbidden(e);
    }

    services::stock_sse_stream(services).into_response()
}
