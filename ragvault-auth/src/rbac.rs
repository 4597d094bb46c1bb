//! Role hierarchy enforcement

use crate::error::AuthError;
use ragvault_core::{Role, VerifiedPrincipal};
use tracing::info;

/// Enforces a minimum role for an operation.
///
/// A required rank R admits any principal of rank >= R.
#[derive(Debug, Clone, Copy)]
pub struct RoleChecker {
    minimum: Role,
}

impl RoleChecker {
    #[must_use]
    pub const fn new(minimum: Role) -> Self {
        Self { minimum }
    }

    /// # Errors
    /// [`AuthError::Forbidden`] when the principal's rank is below the
    /// minimum.
    pub fn check(&self, principal: &VerifiedPrincipal) -> Result<(), AuthError> {
        if principal.role.at_least(self.minimum) {
            return Ok(());
        }

        info!(
            tenant_id = %principal.tenant_id,
            subject = %principal.subject,
            role = %principal.role,
            required = %self.minimum,
            "authorization denied"
        );
        Err(AuthError::Forbidden {
            required: self.minimum,
            actual: principal.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn principal(role: Role) -> VerifiedPrincipal {
        VerifiedPrincipal {
            subject: Uuid::new_v4().to_string(),
            email: "user@example.com".to_string(),
            tenant_id: Uuid::new_v4(),
            role,
            expires_at: 4_102_444_800,
            issuer: "https://auth.example.com/".to_string(),
        }
    }

    #[test]
    fn rank_at_or_above_minimum_is_admitted() {
        let checker = RoleChecker::new(Role::Member);
        assert!(checker.check(&principal(Role::Member)).is_ok());
        assert!(checker.check(&principal(Role::Admin)).is_ok());
        assert!(checker.check(&principal(Role::Owner)).is_ok());
    }

    #[test]
    fn lower_rank_is_forbidden_with_required_role_named() {
        let checker = RoleChecker::new(Role::Member);
        let err = checker.check(&principal(Role::Viewer)).unwrap_err();
        assert!(matches!(
            err,
            AuthError::Forbidden {
                required: Role::Member,
                actual: Role::Viewer
            }
        ));
    }

    #[test]
    fn every_rank_pair_matches_the_rank_rule() {
        let roles = [Role::Viewer, Role::Member, Role::Admin, Role::Owner];
        for required in roles {
            let checker = RoleChecker::new(required);
            for actual in roles {
                let outcome = checker.check(&principal(actual)).is_ok();
                assert_eq!(outcome, actual.rank() >= required.rank());
            }
        }
    }
}
