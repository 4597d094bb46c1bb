//! Tenant context binding and tenant-scoped resource construction
//!
//! A [`TenantContext`] is built once per request from the verified
//! principal and is the only source of tenant identity for storage
//! keys, vector namespaces, and repository calls. There is no API to
//! change the bound tenant after construction.

pub mod context;
pub mod manager;

pub use context::{ResourceType, TenantContext};
pub use manager::TenantVectorManager;
