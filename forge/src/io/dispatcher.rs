//! Request dispatcher: provider-agnostic calls with 429 backoff.
//!
//! The [`Generator`] trait is the seam every agent talks to. [`Dispatcher`]
//! implements it over a [`Transport`] and a [`Sleeper`]; tests swap both for
//! scripted doubles so retry timing is observable without waiting.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::provider::{ProviderRequest, RequestProfile, build_request, extract_result};
use crate::core::types::{GenerationResult, TokenUsage};
use crate::error::{ForgeError, Result};

const RATE_LIMITED: u16 = 429;

/// Anything that can turn a prompt into generated text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, profile: &RequestProfile) -> Result<GenerationResult>;
}

/// Raw HTTP reply, before any provider-specific parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request. Only failures to get any reply at all are errors here.
    async fn send(&self, request: &ProviderRequest) -> Result<HttpReply>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// HTTPS transport over a shared `reqwest` connection pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<HttpReply> {
        let mut builder = self.client.post(&request.endpoint);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .json(&request.body)
            .send()
            .await
            .map_err(|err| ForgeError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| ForgeError::Transport(format!("read response body: {err}")))?;
        Ok(HttpReply { status, body })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total while the provider answers 429.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(4),
        }
    }
}

/// Delay before the retry that follows `attempt` (zero-based): `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
}

pub struct Dispatcher<T, S> {
    transport: T,
    sleeper: S,
    policy: RetryPolicy,
}

impl<T: Transport, S: Sleeper> Dispatcher<T, S> {
    pub fn new(transport: T, sleeper: S, policy: RetryPolicy) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }
}

impl Dispatcher<ReqwestTransport, TokioSleeper> {
    pub fn http(policy: RetryPolicy) -> Self {
        Self::new(ReqwestTransport::default(), TokioSleeper, policy)
    }
}

#[async_trait]
impl<T: Transport, S: Sleeper> Generator for Dispatcher<T, S> {
    #[instrument(skip_all, fields(provider = %profile.provider(), model = profile.model()))]
    async fn generate(&self, prompt: &str, profile: &RequestProfile) -> Result<GenerationResult> {
        let request = build_request(prompt, profile);
        let max_retries = self.policy.max_retries.max(1);

        for attempt in 0..max_retries {
            let reply = self.transport.send(&request).await?;
            match reply.status {
                200..=299 => {
                    let payload: Value = serde_json::from_str(&reply.body).map_err(|err| {
                        ForgeError::MalformedResponse(format!("provider body is not JSON: {err}"))
                    })?;
                    let result = extract_result(profile.provider(), &payload)?;
                    debug!(
                        attempt,
                        input_tokens = result.usage.input_tokens(),
                        output_tokens = result.usage.output_tokens(),
                        "generation complete"
                    );
                    return Ok(result);
                }
                RATE_LIMITED => {
                    if attempt + 1 == max_retries {
                        break;
                    }
                    let delay = backoff_delay(self.policy.base_delay, attempt);
                    warn!(attempt, delay_secs = delay.as_secs(), "rate limited, backing off");
                    self.sleeper.sleep(delay).await;
                }
                status => {
                    return Err(ForgeError::Status {
                        status,
                        body: reply.body,
                    });
                }
            }
        }

        warn!(attempts = max_retries, "rate limit retries exhausted");
        Err(ForgeError::RateLimitExceeded {
            attempts: max_retries,
        })
    }
}

/// Generator wrapper that tallies the usage of every reply it hands out,
/// including replies the caller goes on to reject.
pub struct UsageMeter<'a, G: ?Sized> {
    inner: &'a G,
    usage: Mutex<TokenUsage>,
}

impl<'a, G: Generator + ?Sized> UsageMeter<'a, G> {
    pub fn new(inner: &'a G) -> Self {
        Self {
            inner,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for UsageMeter<'_, G> {
    async fn generate(&self, prompt: &str, profile: &RequestProfile) -> Result<GenerationResult> {
        let reply = self.inner.generate(prompt, profile).await?;
        *self.usage.lock().unwrap_or_else(PoisonError::into_inner) += reply.usage;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::Provider;
    use crate::test_support::{RecordingSleeper, ScriptedGenerator, ScriptedTransport};

    const ANTHROPIC_OK: &str =
        r#"{"content":[{"type":"text","text":"needs-split"}],"usage":{"input_tokens":7,"output_tokens":1}}"#;

    fn profile() -> RequestProfile {
        RequestProfile::new(Provider::Anthropic, "model", 64, "key").expect("profile")
    }

    fn dispatcher(replies: Vec<HttpReply>) -> Dispatcher<ScriptedTransport, RecordingSleeper> {
        Dispatcher::new(
            ScriptedTransport::new(replies),
            RecordingSleeper::default(),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::from_secs(4);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(32));
        assert!(backoff_delay(base, 64) >= backoff_delay(base, 20));
    }

    #[tokio::test]
    async fn rate_limits_then_success_sleep_exact_delays() {
        for k in 0..4u32 {
            let mut replies: Vec<HttpReply> =
                (0..k).map(|_| HttpReply::new(429, "slow down")).collect();
            replies.push(HttpReply::new(200, ANTHROPIC_OK));
            let dispatcher = dispatcher(replies);

            let result = dispatcher.generate("route", &profile()).await.expect("generate");
            assert_eq!(result.text, "needs-split");

            let expected: Vec<Duration> =
                (0..k).map(|i| Duration::from_secs(4 * 2u64.pow(i))).collect();
            assert_eq!(dispatcher.sleeper().delays(), expected);
            assert_eq!(dispatcher.transport().request_count(), k as usize + 1);
        }
    }

    #[tokio::test]
    async fn persistent_rate_limit_is_exceeded_after_max_retries() {
        let dispatcher = dispatcher((0..10).map(|_| HttpReply::new(429, "")).collect());
        let err = dispatcher.generate("route", &profile()).await.expect_err("exhausted");
        assert!(matches!(err, ForgeError::RateLimitExceeded { attempts: 5 }));
        assert_eq!(dispatcher.transport().request_count(), 5);
        assert_eq!(dispatcher.sleeper().delays().len(), 4);
    }

    #[tokio::test]
    async fn other_error_status_fails_immediately_with_body() {
        let dispatcher = dispatcher(vec![
            HttpReply::new(500, "upstream exploded"),
            HttpReply::new(200, ANTHROPIC_OK),
        ]);
        let err = dispatcher.generate("route", &profile()).await.expect_err("status");
        match err {
            ForgeError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(dispatcher.sleeper().delays().is_empty());
    }

    #[tokio::test]
    async fn unparseable_success_body_is_malformed() {
        let dispatcher = dispatcher(vec![HttpReply::new(200, "<html>")]);
        let err = dispatcher.generate("route", &profile()).await.expect_err("malformed");
        assert!(matches!(err, ForgeError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn transport_failures_propagate_without_retry() {
        let dispatcher = dispatcher(Vec::new());
        let err = dispatcher.generate("route", &profile()).await.expect_err("transport");
        assert!(err.is_run_fatal());
    }

    #[tokio::test]
    async fn request_uses_the_profile_shape() {
        let dispatcher = dispatcher(vec![HttpReply::new(200, ANTHROPIC_OK)]);
        dispatcher.generate("hello", &profile()).await.expect("generate");
        let sent = dispatcher.transport().requests();
        assert_eq!(sent[0].endpoint, "https://api.anthropic.com/v1/messages");
        assert_eq!(sent[0].body["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn meter_counts_replies_the_caller_rejects() {
        let generator = ScriptedGenerator::queued(["maybe", "needs-split"]);
        let meter = UsageMeter::new(&generator);
        for _ in 0..2 {
            meter.generate("route", &profile()).await.expect("reply");
        }
        assert!(meter.generate("route", &profile()).await.is_err());
        assert_eq!(meter.usage(), TokenUsage::new(2, 2));
    }
}
