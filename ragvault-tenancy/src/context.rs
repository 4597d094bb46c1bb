//! Request-scoped tenant context

use ragvault_core::{Role, VerifiedPrincipal};
use uuid::Uuid;

/// Resource families stored under a tenant's object-storage prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Document,
    Export,
}

impl ResourceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "documents",
            Self::Export => "exports",
        }
    }
}

/// Session-scoped handle bound to one verified principal.
///
/// Every data access goes through this handle: object-storage keys are
/// prefixed with `tenants/<tenant_id>/`, vector operations use the
/// tenant's namespace, and repository calls take the tenant id it
/// exposes. The bound tenant is immutable.
#[derive(Debug, Clone)]
pub struct TenantContext {
    principal: VerifiedPrincipal,
    /// Identifier of the tenant's server-side encryption key.
    encryption_key_id: String,
}

impl TenantContext {
    #[must_use]
    pub fn new(principal: VerifiedPrincipal) -> Self {
        let encryption_key_id = format!("tenant-key-{}", principal.tenant_id);
        Self {
            principal,
            encryption_key_id,
        }
    }

    /// Override the derived encryption key id (deployments with
    /// externally provisioned keys).
    #[must_use]
    pub fn with_encryption_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.encryption_key_id = key_id.into();
        self
    }

    #[must_use]
    pub const fn principal(&self) -> &VerifiedPrincipal {
        &self.principal
    }

    #[must_use]
    pub const fn tenant_id(&self) -> Uuid {
        self.principal.tenant_id
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.principal.role
    }

    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.principal.user_id()
    }

    #[must_use]
    pub fn encryption_key_id(&self) -> &str {
        &self.encryption_key_id
    }

    /// Full object key for a named resource:
    /// `tenants/<tenant_id>/<resource>/<name>`.
    #[must_use]
    pub fn storage_key(&self, resource: ResourceType, name: &str) -> String {
        format!(
            "tenants/{}/{}/{name}",
            self.principal.tenant_id,
            resource.as_str()
        )
    }

    /// Key prefix owned by this tenant.
    #[must_use]
    pub fn storage_prefix(&self) -> String {
        format!("tenants/{}/", self.principal.tenant_id)
    }

    /// Whether a key lies inside this tenant's prefix. Used as defence
    /// in depth against key tampering before any download.
    #[must_use]
    pub fn owns_key(&self, key: &str) -> bool {
        key.starts_with(&self.storage_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TenantContext {
        TenantContext::new(VerifiedPrincipal {
            subject: Uuid::new_v4().to_string(),
            email: "user@example.com".to_string(),
            tenant_id: Uuid::new_v4(),
            role: Role::Member,
            expires_at: 4_102_444_800,
            issuer: "https://auth.example.com/".to_string(),
        })
    }

    #[test]
    fn storage_keys_are_tenant_prefixed() {
        let ctx = context();
        let key = ctx.storage_key(ResourceType::Document, "abc.pdf");
        assert_eq!(
            key,
            format!("tenants/{}/documents/abc.pdf", ctx.tenant_id())
        );
        assert!(ctx.owns_key(&key));
    }

    #[test]
    fn foreign_keys_are_not_owned() {
        let ctx = context();
        let other = Uuid::new_v4();
        assert!(!ctx.owns_key(&format!("tenants/{other}/documents/abc.pdf")));
        assert!(!ctx.owns_key("documents/abc.pdf"));
    }

    #[test]
    fn encryption_key_is_tenant_bound_by_default() {
        let ctx = context();
        assert!(ctx
            .encryption_key_id()
            .contains(&ctx.tenant_id().to_string()));

        let custom = context().with_encryption_key_id("arn:kms:key/123");
        assert_eq!(custom.encryption_key_id(), "arn:kms:key/123");
    }
}
