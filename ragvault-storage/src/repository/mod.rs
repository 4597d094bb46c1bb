//! Repository backends
//!
//! The relational engine is an external collaborator; these in-memory
//! implementations satisfy the `ragvault-core` repository traits for
//! tests and single-node use, including the tenant-plus-checksum
//! uniqueness constraint and append-only audit semantics.

pub mod memory;
