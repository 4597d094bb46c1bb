//! Verified principal resolved from a bearer token

use super::role::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable identity resolved from a verified JWT.
///
/// Constructed only by the auth layer after signature, expiry, audience,
/// and issuer checks have passed. There is no API to change the bound
/// tenant after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedPrincipal {
    /// Raw `sub` claim.
    pub subject: String,
    pub email: String,
    pub tenant_id: Uuid,
    pub role: Role,
    /// `exp` claim, seconds since the Unix epoch.
    pub expires_at: i64,
    pub issuer: String,
}

impl VerifiedPrincipal {
    /// The `sub` claim parsed as a UUID, when it is UUID-shaped.
    /// Audit rows store `None` for non-UUID subjects (service accounts).
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.subject).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(subject: &str) -> VerifiedPrincipal {
        VerifiedPrincipal {
            subject: subject.to_string(),
            email: "user@example.com".to_string(),
            tenant_id: Uuid::new_v4(),
            role: Role::Member,
            expires_at: 4_102_444_800,
            issuer: "https://auth.example.com/".to_string(),
        }
    }

    #[test]
    fn uuid_shaped_subject_yields_user_id() {
        let id = Uuid::new_v4();
        assert_eq!(principal(&id.to_string()).user_id(), Some(id));
    }

    #[test]
    fn service_account_subject_yields_none() {
        assert_eq!(principal("service-account-42").user_id(), None);
    }
}
