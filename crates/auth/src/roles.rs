use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
///
/// Roles are opaque strings in tokens; [`permissions_for_roles`] is the
/// policy that turns them into permissions. Unknown roles grant nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn role_permissions(role: &str) -> Vec<Permission> {
    match role {
        "admin" => vec![Permission::WILDCARD],
        "manager" => vec![
            Permission::STOCK_READ,
            Permission::STOCK_RECEIVE,
            Permission::STOCK_SHIP,
            Permission::PRODUCTS_READ,
            Permission::PRODUCTS_WRITE,
        ],
        "warehouse" => vec![
            Permission::STOCK_READ,
            Permission::STOCK_RECEIVE,
            Permission::STOCK_SHIP,
            Permission::PRODUCTS_READ,
        ],
        "viewer" => vec![Permission::STOCK_READ, Permission::PRODUCTS_READ],
        _ => Vec::new(),
    }
}

/// Union of the permissions granted by `roles`, deduplicated, in grant order.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = Vec::new();
    for role in roles {
        for perm in role_permissions(role.as_str()) {
            if !out.contains(&perm) {
                out.push(perm);
            }
        }
    }
    out
}
