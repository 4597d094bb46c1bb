//! LLM gateway with model routing, ordered fallback, and circuit
//! breaking
//!
//! The router is pure: it filters the model catalogue by privacy level,
//! context window, and capability bits, then orders candidates by the
//! requested strategy. The gateway walks the fallback chain with a
//! per-attempt timeout and a per-provider circuit breaker, and records
//! token usage as a detached post-processing task that never surfaces
//! errors to the caller.

pub mod breaker;
pub mod catalog;
pub mod error;
pub mod gateway;
pub mod router;

pub use breaker::CircuitBreakerRegistry;
pub use catalog::{default_catalog, ModelSpec, PrivacyLevel, RoutingStrategy};
pub use error::GatewayError;
pub use gateway::{build_messages, CallerIdentity, ChatOutcome, LlmGateway};
pub use router::{ModelRequirements, ModelRouter};
