//! API-side authorization guard.
//!
//! Checked in each handler before the ledger is called, so the ledger and the
//! domain stay auth-agnostic.

use stockledger_auth::{AuthzError, Permission, Principal, authorize};

use crate::context::PrincipalContext;

pub fn authorize_request(
    principal: &PrincipalContext,
    required: &Permission,
) -> Result<(), AuthzError> {
    let principal = Principal::from_roles(principal.principal_id(), principal.roles().to_vec());
    authorize(&principal, required)
}
