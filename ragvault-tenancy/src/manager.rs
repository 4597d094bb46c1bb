//! Tenant-scoped vector store management
//!
//! Hands out vector stores bound to one tenant, backed by either the
//! shared namespaced index or the collection-per-tenant registry. The
//! isolation boundary is provisioned idempotently the first time a
//! tenant binds.

use crate::context::TenantContext;
use ragvault_storage::{CollectionRegistry, SharedVectorIndex, VectorStore};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

enum Backend {
    Namespaced(Arc<SharedVectorIndex>),
    CollectionPerTenant(Arc<CollectionRegistry>),
}

/// Process-lifetime manager created at startup and shared by reference.
pub struct TenantVectorManager {
    backend: Backend,
    label: &'static str,
}

impl TenantVectorManager {
    /// Shared-index backend with per-tenant namespaces.
    #[must_use]
    pub fn namespaced(index: Arc<SharedVectorIndex>) -> Self {
        Self {
            backend: Backend::Namespaced(index),
            label: "namespaced",
        }
    }

    /// Collection-per-tenant backend.
    #[must_use]
    pub fn collection_per_tenant(registry: Arc<CollectionRegistry>) -> Self {
        Self {
            backend: Backend::CollectionPerTenant(registry),
            label: "collection",
        }
    }

    /// Backend label recorded on chunk rows.
    #[must_use]
    pub const fn backend_label(&self) -> &'static str {
        self.label
    }

    /// Build a store bound to the context's tenant.
    #[must_use]
    pub fn store_for(&self, context: &TenantContext) -> Arc<dyn VectorStore> {
        self.store_for_tenant(context.tenant_id())
    }

    /// Build a store bound to an explicit tenant id. Used by the worker
    /// runtime, where the tenant comes from the task payload rather
    /// than a request principal.
    #[must_use]
    pub fn store_for_tenant(&self, tenant_id: Uuid) -> Arc<dyn VectorStore> {
        let store: Arc<dyn VectorStore> = match &self.backend {
            Backend::Namespaced(index) => Arc::new(index.store_for(tenant_id)),
            Backend::CollectionPerTenant(registry) => Arc::new(registry.store_for(tenant_id)),
        };
        debug!(tenant_id = %tenant_id, namespace = store.namespace(), "vector store bound");
        store
    }
}
