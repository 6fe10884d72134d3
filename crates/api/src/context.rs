use stockledger_auth::{Permission, PrincipalId, Role, permissions_for_roles};

/// Principal context for a request (authenticated identity + roles).
///
/// Built by the auth middleware from verified claims and carried as a request
/// extension; handlers never read identity from anywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Effective permissions under the built-in role policy.
    pub fn permissions(&self) -> Vec<Permission> {
        permissions_for_roles(&self.roles)
    }
}
