//! RS256 token verification and claim extraction
//!
//! Claim shapes differ across identity providers: Cognito uses
//! `custom:` prefixes and `cognito:groups`, Auth0 namespaces custom
//! claims under a URL. Extraction tries each known form in order and
//! never reads tenant or role from anything but the verified payload.

use crate::error::AuthError;
use crate::jwks::JwksCache;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use ragvault_core::{Role, VerifiedPrincipal};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: String,
    exp: i64,
    iss: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Verifies bearer tokens against one issuer/audience pair.
pub struct TokenVerifier {
    cache: Arc<JwksCache>,
    issuer: String,
    audience: String,
    claim_namespace: String,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(
        cache: Arc<JwksCache>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        claim_namespace: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            issuer: issuer.into(),
            audience: audience.into(),
            claim_namespace: claim_namespace.into(),
        }
    }

    /// Verify a raw bearer token and resolve the acting principal.
    ///
    /// Signature, expiry (no clock skew), audience, and issuer are all
    /// enforced; tenant and role come from provider-specific claims.
    ///
    /// # Errors
    /// A typed [`AuthError`]; every variant maps to a 401 except
    /// `Forbidden`, which this method never returns.
    pub async fn verify(&self, token: &str) -> Result<VerifiedPrincipal, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedHeader)?;
        let kid = header.kid.ok_or(AuthError::MalformedHeader)?;

        let jwk = self.cache.signing_key(&self.issuer, &kid).await?;
        let key =
            DecodingKey::from_rsa_components(&jwk.n, &jwk.e).map_err(|_| AuthError::UnknownKey {
                kid: kid.clone(),
            })?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        // Tokens must be valid now; no clock skew tolerance.
        validation.leeway = 0;

        let data = decode::<Claims>(token, &key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidAudience => AuthError::BadAudience,
                ErrorKind::InvalidIssuer => AuthError::BadIssuer,
                _ => AuthError::InvalidToken {
                    message: e.to_string(),
                },
            }
        })?;

        let claims = data.claims;
        let tenant_id = extract_tenant_id(&claims.extra, &self.claim_namespace)?;
        let role = extract_role(&claims.extra, &self.claim_namespace);

        info!(
            tenant_id = %tenant_id,
            subject = %claims.sub,
            role = %role,
            "token verified"
        );

        Ok(VerifiedPrincipal {
            subject: claims.sub,
            email: claims.email,
            tenant_id,
            role,
            expires_at: claims.exp,
            issuer: claims.iss,
        })
    }
}

/// Read the tenant id claim, trying each known form in order.
pub(crate) fn extract_tenant_id(
    claims: &Map<String, Value>,
    namespace: &str,
) -> Result<Uuid, AuthError> {
    let raw = claims
        .get("custom:tenant_id")
        .or_else(|| claims.get(&format!("{namespace}/tenant_id")))
        .or_else(|| claims.get("tenant_id"))
        .and_then(Value::as_str)
        .ok_or(AuthError::MissingTenant)?;

    Uuid::parse_str(raw).map_err(|_| AuthError::InvalidTenant {
        raw: raw.to_string(),
    })
}

/// Read the role claim; falls back to the first Cognito group, then to
/// `viewer` with a warning for unknown values.
pub(crate) fn extract_role(claims: &Map<String, Value>, namespace: &str) -> Role {
    let raw = claims
        .get("custom:role")
        .or_else(|| claims.get(&format!("{namespace}/role")))
        .or_else(|| claims.get("role"))
        .and_then(Value::as_str)
        .or_else(|| {
            claims
                .get("cognito:groups")
                .and_then(Value::as_array)
                .and_then(|groups| groups.first())
                .and_then(Value::as_str)
        });

    match raw.map(Role::parse) {
        Some(Some(role)) => role,
        other => {
            warn!(raw = ?other, "unknown role in token, defaulting to viewer");
            Role::Viewer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    const NS: &str = "https://ragvault.dev";

    #[test]
    fn tenant_claim_precedence_is_cognito_then_namespace_then_plain() {
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        let both = claims(json!({
            "custom:tenant_id": tenant_a.to_string(),
            "tenant_id": tenant_b.to_string(),
        }));
        assert_eq!(extract_tenant_id(&both, NS).unwrap(), tenant_a);

        let mut namespaced = Map::new();
        namespaced.insert(
            format!("{NS}/tenant_id"),
            Value::String(tenant_b.to_string()),
        );
        assert_eq!(extract_tenant_id(&namespaced, NS).unwrap(), tenant_b);
    }

    #[test]
    fn missing_tenant_claim_is_rejected() {
        let empty = claims(json!({"sub": "abc"}));
        assert!(matches!(
            extract_tenant_id(&empty, NS),
            Err(AuthError::MissingTenant)
        ));
    }

    #[test]
    fn non_uuid_tenant_is_rejected() {
        let bad = claims(json!({"tenant_id": "not-a-uuid"}));
        assert!(matches!(
            extract_tenant_id(&bad, NS),
            Err(AuthError::InvalidTenant { raw }) if raw == "not-a-uuid"
        ));
    }

    #[test]
    fn role_falls_back_to_cognito_groups() {
        let grouped = claims(json!({"cognito:groups": ["admin", "member"]}));
        assert_eq!(extract_role(&grouped, NS), Role::Admin);
    }

    #[test]
    fn unknown_role_defaults_to_viewer() {
        let odd = claims(json!({"role": "superuser"}));
        assert_eq!(extract_role(&odd, NS), Role::Viewer);

        let absent = claims(json!({}));
        assert_eq!(extract_role(&absent, NS), Role::Viewer);
    }

    #[test]
    fn explicit_role_claim_wins_over_groups() {
        let mixed = claims(json!({
            "custom:role": "member",
            "cognito:groups": ["owner"],
        }));
        assert_eq!(extract_role(&mixed, NS), Role::Member);
    }
}
