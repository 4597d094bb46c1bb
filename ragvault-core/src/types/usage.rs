//! Token usage accounting types
//!
//! Usage rows accumulate per `(tenant, user, model, provider, month)`
//! with additive upsert semantics; one pass over a month's rows yields
//! the billing report.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Accumulator key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageKey {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub model: String,
    pub provider: String,
    /// `YYYY-MM` month bucket.
    pub month: String,
}

/// Additive delta recorded after one model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageDelta {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Per-model slice of a monthly report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u64,
    pub cost_usd: f64,
}

/// Aggregated token usage for one tenant-month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyUsageReport {
    pub tenant_id: Uuid,
    pub month: String,
    pub total_input: u64,
    pub total_output: u64,
    pub total_requests: u64,
    pub total_cost_usd: f64,
    pub by_model: Vec<ModelUsage>,
}
