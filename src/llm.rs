//! LLM interface and a concrete OpenRouter-backed client.
//!
//! Same endpoint, headers, and response-shape handling as a typical
//! OpenRouter chat-completions client, generalized from a fixed
//! two-message (system, user) call to an arbitrary message sequence so
//! planner/reflector/critic/synthesis can all share one client.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self { temperature: 0.3, max_tokens: Some(1024), timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

/// The core's sole dependency on an LLM backend. Every suspension point
/// that calls the model (planning, reflection, critic, synthesis, dynamic
/// input resolution) goes through this trait.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: CompletionOptions,
    ) -> Result<ChatCompletion>;
}

#[derive(Clone)]
pub struct OpenRouterLlm {
    http: reqwest::Client,
    api_key: String,
    model: String,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterLlm {
    pub fn from_env(http: reqwest::Client, model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY missing (set env var)")?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("OPENROUTER_API_KEY empty"));
        }
        let referer = std::env::var("OPENROUTER_HTTP_REFERER")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let title = std::env::var("OPENROUTER_APP_TITLE")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self { http, api_key, model: model.into(), referer, title })
    }
}

#[async_trait]
impl Llm for OpenRouterLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: CompletionOptions,
    ) -> Result<ChatCompletion> {
        let start = Instant::now();

        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| ChatMessageWire {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    }
                    .to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: Some(opts.temperature),
            max_tokens: opts.max_tokens,
        };

        let mut http_req = self
            .http
            .post("https://openrouter.ai/api/v1/chat/completions")
            .timeout(opts.timeout)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(r) = &self.referer {
            http_req = http_req.header("HTTP-Referer", r);
        }
        if let Some(t) = &self.title {
            http_req = http_req.header("X-Title", t);
        }

        let resp = http_req.json(&req).send().await.context("openrouter request")?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("openrouter {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).context("openrouter json parse")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        Ok(ChatCompletion {
            content,
            model: self.model.clone(),
            usage: LlmUsage {
                prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
                completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
                total_tokens: parsed.usage.as_ref().and_then(|u| u.total_tokens),
            },
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessageWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessageWire {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

/// Deterministic test double: returns queued responses in order, recording
/// the prompts it was called with so assertions can inspect intent.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    pub struct FakeLlm {
        responses: Mutex<std::collections::VecDeque<String>>,
        pub calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeLlm {
        pub fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Llm for FakeLlm {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _opts: CompletionOptions,
        ) -> Result<ChatCompletion> {
            self.calls.lock().await.push(messages.to_vec());
            let content = self
                .responses
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow!("FakeLlm exhausted"))?;
            Ok(ChatCompletion {
                content,
                model: "fake".to_string(),
                usage: LlmUsage::default(),
                latency_ms: 0,
            })
        }
    }
}
