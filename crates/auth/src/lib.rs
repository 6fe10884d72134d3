//! `stockledger-auth` — authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: token validation, roles, permissions and
//! the role policy are plain functions over plain data.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use principal::PrincipalId;
pub use roles::{Role, permissions_for_roles};
