//! Typed authentication and authorization failures

use ragvault_core::{ApiError, ErrorCode, Role};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token header")]
    MalformedHeader,

    #[error("no signing key found for kid {kid:?}")]
    UnknownKey { kid: String },

    #[error("token has expired")]
    Expired,

    #[error("token audience is not accepted")]
    BadAudience,

    #[error("token issuer is not accepted")]
    BadIssuer,

    #[error("token is missing the required tenant_id claim")]
    MissingTenant,

    #[error("invalid tenant_id value in token: {raw:?}")]
    InvalidTenant { raw: String },

    /// Signature or payload rejected for any other reason.
    #[error("invalid token: {message}")]
    InvalidToken { message: String },

    /// The JWKS endpoint could not be reached or returned garbage. The
    /// client cannot fix a key-server outage, but security requires
    /// refusing the token.
    #[error("unable to retrieve token signing keys: {message}")]
    KeyFetch { message: String },

    #[error("access denied; role '{required}' or above is required, your role is '{actual}'")]
    Forbidden { required: Role, actual: Role },
}

impl ApiError for AuthError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Expired => ErrorCode::TokenExpired,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            _ => ErrorCode::Unauthorized,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Forbidden { required, actual } => Some(json!({
                "required_role": required.as_str(),
                "actual_role": actual.as_str(),
            })),
            _ => None,
        }
    }
}
