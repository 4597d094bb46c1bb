//! Versioned prompt templates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A versioned system prompt row.
///
/// `(tenant_id, name, version)` is unique. A `None` tenant marks the
/// global default. `ab_weight` is a relative traffic weight in `[0, 100]`
/// used for weighted-random selection among active variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub version: u32,
    pub template_text: String,
    pub is_active: bool,
    pub ab_weight: u32,
    pub created_at: DateTime<Utc>,
}
