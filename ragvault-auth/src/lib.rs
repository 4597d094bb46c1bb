//! Bearer-token verification, JWKS caching, and role enforcement
//!
//! Three independently testable layers, composed by the request glue:
//! [`JwksCache`] resolves signing keys with TTL and rotation handling,
//! [`TokenVerifier`] decodes RS256 tokens into a
//! [`ragvault_core::VerifiedPrincipal`], and [`RoleChecker`] enforces
//! the role hierarchy.

pub mod error;
pub mod jwks;
pub mod rbac;
pub mod verifier;

pub use error::AuthError;
pub use jwks::{HttpJwksFetcher, Jwk, JwkSet, JwksCache, JwksCacheStats, JwksFetcher};
pub use rbac::RoleChecker;
pub use verifier::TokenVerifier;
