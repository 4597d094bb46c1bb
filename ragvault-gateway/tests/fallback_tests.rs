//! Failover, circuit breaking, and cost-tracking behavior of the
//! gateway against scripted provider adapters.

use async_trait::async_trait;
use futures::stream;
use ragvault_core::traits::clock::SystemClock;
use ragvault_core::traits::provider::{
    ChatCompletion, ChatDeltaStream, ChatMessage, ChatProvider, ProviderError, ProviderErrorKind,
};
use ragvault_core::traits::repository::UsageRecorder;
use ragvault_gateway::{
    build_messages, default_catalog, CallerIdentity, CircuitBreakerRegistry, GatewayError,
    LlmGateway, ModelRequirements, ModelRouter, PrivacyLevel,
};
use ragvault_storage::MemoryUsageRecorder;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::StreamExt;
use uuid::Uuid;

/// Provider that fails its first `failures` calls with `kind`, then
/// succeeds.
struct ScriptedProvider {
    label: String,
    failures: usize,
    kind: ProviderErrorKind,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(label: &str, failures: usize, kind: ProviderErrorKind) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            failures,
            kind,
            calls: AtomicUsize::new(0),
        })
    }

    fn reliable(label: &str) -> Arc<Self> {
        Self::new(label, 0, ProviderErrorKind::ServerError)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn provider_label(&self) -> &str {
        &self.label
    }

    async fn complete(
        &self,
        model_id: &str,
        _messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ProviderError::new(&self.label, self.kind, "scripted failure"));
        }
        Ok(ChatCompletion {
            content: format!("answer from {}/{model_id}", self.label),
            usage: None,
        })
    }

    async fn stream(
        &self,
        model_id: &str,
        _messages: &[ChatMessage],
    ) -> Result<ChatDeltaStream, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ProviderError::new(&self.label, self.kind, "scripted failure"));
        }
        let deltas = vec![
            Ok(format!("answer from {}", self.label)),
            Ok(format!("/{model_id}")),
        ];
        Ok(Box::pin(stream::iter(deltas)))
    }
}

struct Harness {
    gateway: LlmGateway,
    usage: Arc<MemoryUsageRecorder>,
    caller: CallerIdentity,
}

fn harness(providers: Vec<Arc<ScriptedProvider>>) -> Harness {
    let usage = Arc::new(MemoryUsageRecorder::new());
    let breaker = Arc::new(CircuitBreakerRegistry::new(Arc::new(SystemClock)));
    let map: HashMap<String, Arc<dyn ChatProvider>> = providers
        .into_iter()
        .map(|p| (p.label.clone(), p as Arc<dyn ChatProvider>))
        .collect();

    Harness {
        gateway: LlmGateway::new(
            ModelRouter::new(default_catalog()),
            breaker,
            map,
            usage.clone(),
            Arc::new(SystemClock),
        ),
        usage,
        caller: CallerIdentity {
            tenant_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
        },
    }
}

fn sensitive() -> ModelRequirements {
    ModelRequirements {
        privacy: PrivacyLevel::Sensitive,
        ..Default::default()
    }
}

/// Post-processing is fire-and-forget; poll until the detached task
/// lands the row.
async fn wait_for_usage(
    usage: &MemoryUsageRecorder,
    tenant_id: Uuid,
    month: &str,
) -> ragvault_core::MonthlyUsageReport {
    for _ in 0..100 {
        let report = usage.monthly_report(tenant_id, month).await.unwrap();
        if report.total_requests > 0 {
            return report;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("usage was never recorded");
}

#[tokio::test]
async fn primary_failure_fails_over_to_next_provider() {
    // Sensitive chain: azure_openai, aws_bedrock, ollama.
    let azure = ScriptedProvider::new("azure_openai", usize::MAX, ProviderErrorKind::ServerError);
    let bedrock = ScriptedProvider::reliable("aws_bedrock");
    let h = harness(vec![azure, bedrock.clone()]);

    let outcome = h
        .gateway
        .complete(h.caller, &sensitive(), &build_messages("system", "question"))
        .await
        .unwrap();

    assert_eq!(outcome.provider, "aws_bedrock");
    assert!(outcome.content.contains("aws_bedrock"));
    // One breaker failure recorded on the primary.
    assert_eq!(h.gateway.breaker().failure_count("azure_openai"), 1);

    // Cost tracking keys on the provider that actually served.
    let month = chrono::Utc::now().format("%Y-%m").to_string();
    let report = wait_for_usage(&h.usage, h.caller.tenant_id, &month).await;
    assert_eq!(report.total_requests, 1);
    assert_eq!(report.by_model[0].provider, "aws_bedrock");
}

#[tokio::test]
async fn rate_limits_open_the_circuit_after_three_failures() {
    let azure = ScriptedProvider::new("azure_openai", usize::MAX, ProviderErrorKind::RateLimited);
    let bedrock = ScriptedProvider::reliable("aws_bedrock");
    let h = harness(vec![azure.clone(), bedrock]);
    let messages = build_messages("system", "question");

    for _ in 0..3 {
        h.gateway
            .complete(h.caller, &sensitive(), &messages)
            .await
            .unwrap();
    }
    assert_eq!(h.gateway.breaker().failure_count("azure_openai"), 3);
    assert_eq!(azure.calls.load(Ordering::SeqCst), 3);

    // Fourth call skips the open primary entirely.
    h.gateway
        .complete(h.caller, &sensitive(), &messages)
        .await
        .unwrap();
    assert_eq!(azure.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn auth_failures_surface_immediately_without_failover() {
    let azure = ScriptedProvider::new("azure_openai", usize::MAX, ProviderErrorKind::AuthFailed);
    let bedrock = ScriptedProvider::reliable("aws_bedrock");
    let h = harness(vec![azure, bedrock.clone()]);

    let err = h
        .gateway
        .complete(h.caller, &sensitive(), &build_messages("s", "q"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::NonRetriable(_)));
    assert_eq!(bedrock.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_chain_aggregates_every_attempt() {
    let azure = ScriptedProvider::new("azure_openai", usize::MAX, ProviderErrorKind::ServerError);
    let bedrock = ScriptedProvider::new("aws_bedrock", usize::MAX, ProviderErrorKind::ServerError);
    let ollama = ScriptedProvider::new("ollama", usize::MAX, ProviderErrorKind::Network);
    let h = harness(vec![azure, bedrock, ollama]);

    let err = h
        .gateway
        .complete(h.caller, &sensitive(), &build_messages("s", "q"))
        .await
        .unwrap_err();

    match err {
        GatewayError::AllProvidersFailed { attempts } => {
            assert_eq!(attempts.len(), 3);
            assert!(attempts[0].starts_with("azure_openai/"));
            assert!(attempts[2].starts_with("ollama/"));
        }
        other => panic!("expected aggregate failure, got {other}"),
    }
}

#[tokio::test]
async fn streaming_fails_over_before_first_delta() {
    let azure = ScriptedProvider::new("azure_openai", usize::MAX, ProviderErrorKind::ServerError);
    let bedrock = ScriptedProvider::reliable("aws_bedrock");
    let h = harness(vec![azure, bedrock]);

    let (spec, mut stream) = h
        .gateway
        .stream(h.caller, &sensitive(), &build_messages("s", "q"))
        .await
        .unwrap();
    assert_eq!(spec.provider, "aws_bedrock");

    let mut content = String::new();
    while let Some(delta) = stream.next().await {
        content.push_str(&delta.unwrap());
    }
    assert!(content.contains("aws_bedrock"));

    // Stream completion records usage for the serving provider.
    let month = chrono::Utc::now().format("%Y-%m").to_string();
    let report = wait_for_usage(&h.usage, h.caller.tenant_id, &month).await;
    assert_eq!(report.total_requests, 1);
    assert_eq!(report.by_model[0].provider, "aws_bedrock");
}
