//! Fallback-chain execution and post-processing
//!
//! Walks the router's chain with a 30-second per-attempt timeout.
//! Retriable failures (rate limit, 5xx, timeout, transient network)
//! record a breaker failure and move to the next model; anything else
//! surfaces immediately. Token-usage accounting runs as a detached
//! task after each successful call and never raises to the caller.

use crate::breaker::CircuitBreakerRegistry;
use crate::catalog::ModelSpec;
use crate::error::GatewayError;
use crate::router::{ModelRequirements, ModelRouter};
use ragvault_core::traits::clock::Clock;
use ragvault_core::traits::provider::{
    ChatDeltaStream, ChatMessage, ChatProvider, ChatUsage, ProviderError,
};
use ragvault_core::traits::repository::UsageRecorder;
use ragvault_core::{UsageDelta, UsageKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Rough token estimate when the provider does not report usage.
const CHARS_PER_TOKEN_EST: usize = 4;

/// One successful completion with its provenance.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub model_id: String,
    pub provider: String,
    pub latency_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Billing identity for one call.
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
}

/// Privacy-aware gateway over the registered provider adapters.
pub struct LlmGateway {
    router: ModelRouter,
    breaker: Arc<CircuitBreakerRegistry>,
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    usage: Arc<dyn UsageRecorder>,
    clock: Arc<dyn Clock>,
}

impl LlmGateway {
    #[must_use]
    pub fn new(
        router: ModelRouter,
        breaker: Arc<CircuitBreakerRegistry>,
        providers: HashMap<String, Arc<dyn ChatProvider>>,
        usage: Arc<dyn UsageRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            router,
            breaker,
            providers,
            usage,
            clock,
        }
    }

    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breaker
    }

    /// Non-streaming completion with ordered failover.
    ///
    /// # Errors
    /// [`GatewayError::NonRetriable`] immediately on auth or invalid
    /// request failures; [`GatewayError::AllProvidersFailed`] when the
    /// chain is exhausted.
    pub async fn complete(
        &self,
        caller: CallerIdentity,
        requirements: &ModelRequirements,
        messages: &[ChatMessage],
    ) -> Result<ChatOutcome, GatewayError> {
        let chain = self.router.fallback_chain(requirements)?;
        let mut attempts: Vec<String> = Vec::new();

        for spec in chain {
            let Some(provider) = self.eligible_provider(&spec, &mut attempts) else {
                continue;
            };

            let start = Instant::now();
            match tokio::time::timeout(
                PER_ATTEMPT_TIMEOUT,
                provider.complete(&spec.model_id, messages),
            )
            .await
            {
                Err(_elapsed) => {
                    self.breaker.record_failure(&spec.provider);
                    attempts.push(format!(
                        "{}/{}: timed out after {}s",
                        spec.provider,
                        spec.model_id,
                        PER_ATTEMPT_TIMEOUT.as_secs()
                    ));
                }
                Ok(Err(err)) if err.is_retriable() => {
                    self.breaker.record_failure(&spec.provider);
                    warn!(provider = %spec.provider, error = %err, "retriable provider failure");
                    attempts.push(format!("{}/{}: {err}", spec.provider, spec.model_id));
                }
                Ok(Err(err)) => {
                    return Err(GatewayError::NonRetriable(err));
                }
                Ok(Ok(completion)) => {
                    self.breaker.record_success(&spec.provider);
                    let latency_ms =
                        u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    let (input_tokens, output_tokens) =
                        token_counts(messages, &completion.content, completion.usage);

                    self.spawn_post_processing(caller, &spec, input_tokens, output_tokens);
                    info!(
                        provider = %spec.provider,
                        model = %spec.model_id,
                        latency_ms,
                        "completion served"
                    );
                    return Ok(ChatOutcome {
                        content: completion.content,
                        model_id: spec.model_id,
                        provider: spec.provider,
                        latency_ms,
                        input_tokens,
                        output_tokens,
                    });
                }
            }
        }

        Err(GatewayError::AllProvidersFailed { attempts })
    }

    /// Streaming completion. Failover happens while opening the stream;
    /// once a provider starts emitting deltas, an in-stream failure
    /// surfaces to the caller. Returns the serving spec alongside the
    /// delta stream.
    ///
    /// # Errors
    /// Same classification as [`Self::complete`].
    pub async fn stream(
        &self,
        caller: CallerIdentity,
        requirements: &ModelRequirements,
        messages: &[ChatMessage],
    ) -> Result<(ModelSpec, ChatDeltaStream), GatewayError> {
        let chain = self.router.fallback_chain(requirements)?;
        let mut attempts: Vec<String> = Vec::new();

        for spec in chain {
            let Some(provider) = self.eligible_provider(&spec, &mut attempts) else {
                continue;
            };

            match tokio::time::timeout(
                PER_ATTEMPT_TIMEOUT,
                provider.stream(&spec.model_id, messages),
            )
            .await
            {
                Err(_elapsed) => {
                    self.breaker.record_failure(&spec.provider);
                    attempts.push(format!(
                        "{}/{}: stream open timed out",
                        spec.provider, spec.model_id
                    ));
                }
                Ok(Err(err)) if err.is_retriable() => {
                    self.breaker.record_failure(&spec.provider);
                    attempts.push(format!("{}/{}: {err}", spec.provider, spec.model_id));
                }
                Ok(Err(err)) => return Err(GatewayError::NonRetriable(err)),
                Ok(Ok(inner)) => {
                    self.breaker.record_success(&spec.provider);
                    let stream = self.wrap_stream_for_accounting(caller, spec.clone(), messages, inner);
                    return Ok((spec, stream));
                }
            }
        }

        Err(GatewayError::AllProvidersFailed { attempts })
    }

    fn eligible_provider(
        &self,
        spec: &ModelSpec,
        attempts: &mut Vec<String>,
    ) -> Option<Arc<dyn ChatProvider>> {
        if self.breaker.is_open(&spec.provider) {
            debug!(provider = %spec.provider, "skipping provider, circuit open");
            attempts.push(format!("{}/{}: circuit open", spec.provider, spec.model_id));
            return None;
        }
        match self.providers.get(&spec.provider) {
            Some(provider) => Some(Arc::clone(provider)),
            None => {
                attempts.push(format!(
                    "{}/{}: no adapter registered",
                    spec.provider, spec.model_id
                ));
                None
            }
        }
    }

    /// Forward deltas through a channel, counting output characters so
    /// usage can be recorded when the stream ends.
    fn wrap_stream_for_accounting(
        &self,
        caller: CallerIdentity,
        spec: ModelSpec,
        messages: &[ChatMessage],
        mut inner: ChatDeltaStream,
    ) -> ChatDeltaStream {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, ProviderError>>(64);
        let usage = Arc::clone(&self.usage);
        let clock = Arc::clone(&self.clock);
        let input_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();

        tokio::spawn(async move {
            let mut output_chars = 0usize;
            while let Some(item) = inner.next().await {
                if let Ok(delta) = &item {
                    output_chars += delta.chars().count();
                }
                if tx.send(item).await.is_err() {
                    // Caller went away; still record what was streamed.
                    break;
                }
            }
            let input_tokens = (input_chars / CHARS_PER_TOKEN_EST).max(1) as u64;
            let output_tokens = (output_chars / CHARS_PER_TOKEN_EST) as u64;
            record_usage(usage, clock, caller, &spec, input_tokens, output_tokens).await;
        });

        Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
    }

    fn spawn_post_processing(
        &self,
        caller: CallerIdentity,
        spec: &ModelSpec,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        let usage = Arc::clone(&self.usage);
        let clock = Arc::clone(&self.clock);
        let spec = spec.clone();
        tokio::spawn(async move {
            record_usage(usage, clock, caller, &spec, input_tokens, output_tokens).await;
        });
    }
}

async fn record_usage(
    usage: Arc<dyn UsageRecorder>,
    clock: Arc<dyn Clock>,
    caller: CallerIdentity,
    spec: &ModelSpec,
    input_tokens: u64,
    output_tokens: u64,
) {
    let key = UsageKey {
        tenant_id: caller.tenant_id,
        user_id: caller.user_id,
        model: spec.model_id.clone(),
        provider: spec.provider.clone(),
        month: clock.now().format("%Y-%m").to_string(),
    };
    let delta = UsageDelta {
        input_tokens,
        output_tokens,
        cost_usd: spec.cost_usd(input_tokens, output_tokens),
    };
    if let Err(err) = usage.record(key, delta).await {
        // Post-processing never surfaces to the caller.
        error!(error = %err, "token usage recording failed");
    }
}

fn token_counts(
    messages: &[ChatMessage],
    content: &str,
    reported: Option<ChatUsage>,
) -> (u64, u64) {
    reported.map_or_else(
        || {
            let input_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
            (
                ((input_chars / CHARS_PER_TOKEN_EST).max(1)) as u64,
                (content.chars().count() / CHARS_PER_TOKEN_EST) as u64,
            )
        },
        |usage| (usage.input_tokens, usage.output_tokens),
    )
}

/// Build the standard two-message prompt.
#[must_use]
pub fn build_messages(system_prompt: &str, user_question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_question),
    ]
}
