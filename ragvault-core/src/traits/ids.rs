//! Id generation seam

use uuid::Uuid;

/// Injectable UUID source so ids are deterministic under test.
pub trait UuidGen: Send + Sync {
    fn new_uuid(&self) -> Uuid;
}

/// Production generator backed by random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomUuidGen;

impl UuidGen for RandomUuidGen {
    fn new_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}
