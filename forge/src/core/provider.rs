//! Provider-specific request shapes and reply extraction.
//!
//! Each [`Provider`] has exactly one request builder and one extractor. Both are
//! pure; the dispatcher owns the network side.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::types::{GenerationResult, TokenUsage};
use crate::error::{ForgeError, Result};

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GEMINI_ENDPOINT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    Gemini,
    OpenAi,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ForgeError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            other => Err(ForgeError::Config(format!("unknown provider '{other}'"))),
        }
    }
}

/// Immutable description of how to reach one model.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestProfile {
    provider: Provider,
    model: String,
    max_output_tokens: u32,
    api_key: String,
}

impl fmt::Debug for RequestProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestProfile")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl RequestProfile {
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        max_output_tokens: u32,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(ForgeError::Config("model must be non-empty".to_string()));
        }
        if max_output_tokens == 0 {
            return Err(ForgeError::Config(
                "max_output_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            provider,
            model,
            max_output_tokens,
            api_key: api_key.into(),
        })
    }

    /// Copy of this profile with a different output-token ceiling.
    pub fn with_max_output_tokens(&self, max_output_tokens: u32) -> Self {
        Self {
            max_output_tokens: max_output_tokens.max(1),
            ..self.clone()
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// A fully built HTTP request, independent of any client library.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

pub fn build_request(prompt: &str, profile: &RequestProfile) -> ProviderRequest {
    let header = |name: &str, value: &str| (name.to_string(), value.to_string());
    match profile.provider {
        Provider::Anthropic => ProviderRequest {
            endpoint: ANTHROPIC_ENDPOINT.to_string(),
            headers: vec![
                header("x-api-key", profile.api_key()),
                header("anthropic-version", ANTHROPIC_VERSION),
                header("content-type", "application/json"),
            ],
            body: json!({
                "model": profile.model,
                "max_tokens": profile.max_output_tokens,
                "messages": [{"role": "user", "content": prompt}],
            }),
        },
        Provider::Gemini => ProviderRequest {
            endpoint: format!("{GEMINI_ENDPOINT_BASE}/{}:generateContent", profile.model),
            headers: vec![
                header("x-goog-api-key", profile.api_key()),
                header("content-type", "application/json"),
            ],
            body: json!({
                "contents": [{"parts": [{"text": prompt}]}],
                "generationConfig": {"maxOutputTokens": profile.max_output_tokens},
            }),
        },
        Provider::OpenAi => ProviderRequest {
            endpoint: OPENAI_ENDPOINT.to_string(),
            headers: vec![
                header("authorization", &format!("Bearer {}", profile.api_key())),
                header("content-type", "application/json"),
            ],
            body: json!({
                "model": profile.model,
                "max_tokens": profile.max_output_tokens,
                "messages": [{"role": "user", "content": prompt}],
            }),
        },
    }
}

/// Normalize a successful provider payload into text plus token usage.
pub fn extract_result(provider: Provider, payload: &Value) -> Result<GenerationResult> {
    match provider {
        Provider::Anthropic => {
            let blocks = payload
                .get("content")
                .and_then(Value::as_array)
                .ok_or_else(|| missing(provider, "content"))?;
            let text = join_text(blocks.iter().filter_map(|block| block.get("text")));
            let usage = payload.get("usage").ok_or_else(|| missing(provider, "usage"))?;
            Ok(GenerationResult {
                text,
                usage: TokenUsage::new(
                    count(usage, "input_tokens", provider)?,
                    count(usage, "output_tokens", provider)?,
                ),
            })
        }
        Provider::Gemini => {
            let parts = payload
                .pointer("/candidates/0/content/parts")
                .and_then(Value::as_array)
                .ok_or_else(|| missing(provider, "candidates[0].content.parts"))?;
            let text = join_text(parts.iter().filter_map(|part| part.get("text")));
            let usage = payload
                .get("usageMetadata")
                .ok_or_else(|| missing(provider, "usageMetadata"))?;
            let output = match usage.get("candidatesTokenCount") {
                Some(_) => count(usage, "candidatesTokenCount", provider)?,
                None => 0,
            };
            Ok(GenerationResult {
                text,
                usage: TokenUsage::new(count(usage, "promptTokenCount", provider)?, output),
            })
        }
        Provider::OpenAi => {
            let text = payload
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .ok_or_else(|| missing(provider, "choices[0].message.content"))?
                .to_string();
            let usage = payload.get("usage").ok_or_else(|| missing(provider, "usage"))?;
            Ok(GenerationResult {
                text,
                usage: TokenUsage::new(
                    count(usage, "prompt_tokens", provider)?,
                    count(usage, "completion_tokens", provider)?,
                ),
            })
        }
    }
}

fn join_text<'a>(values: impl Iterator<Item = &'a Value>) -> String {
    values.filter_map(Value::as_str).collect::<Vec<_>>().join("")
}

fn count(usage: &Value, key: &str, provider: Provider) -> Result<u64> {
    usage
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| missing(provider, key))
}

fn missing(provider: Provider, field: &str) -> ForgeError {
    ForgeError::MalformedResponse(format!("{provider} reply is missing '{field}'"))
}
