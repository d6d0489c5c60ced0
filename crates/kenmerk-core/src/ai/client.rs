//! Minimal AI provider client contract plus the four concrete
//! implementations the fixed hierarchy cascades through.
//!
//! Grounded on `backend/ai/provider_factory.py`'s `ProviderFactory`
//! registry (openai/anthropic/gemini/ollama keyed the same way) and the
//! teacher's `reqwest`-based HTTP client usage elsewhere in the workspace
//! (e.g. `orchestrator/openrouter_service.rs`). Every provider speaks the
//! same narrow contract — `generate(prompt, system, json_mode, images?)` —
//! so the AI Authority never branches on provider identity past selection.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::ai::capability::CapabilityState;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderName {
    OpenAi,
    Gemini,
    Anthropic,
    Ollama,
}

impl ProviderName {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderName::OpenAi => "openai",
            ProviderName::Gemini => "gemini",
            ProviderName::Anthropic => "anthropic",
            ProviderName::Ollama => "ollama",
        }
    }
}

/// The fixed provider hierarchy. Ollama is last-resort and is never
/// silently chosen when a higher-tier provider is configured and
/// operational.
pub const PROVIDER_HIERARCHY: [ProviderName; 4] =
    [ProviderName::OpenAi, ProviderName::Gemini, ProviderName::Anthropic, ProviderName::Ollama];

pub struct GenerateRequest<'a> {
    pub prompt: &'a str,
    pub system: &'a str,
    pub json_mode: bool,
    pub images: Option<&'a [String]>,
}

/// The contract every provider speaks. Capability probing and text
/// generation are separate calls because a health probe must stay cheap
/// (bounded 5s deadline per spec §5) while generation carries a much
/// longer deadline (30s).
#[async_trait]
pub trait AiProviderClient: Send + Sync {
    fn name(&self) -> ProviderName;
    fn is_configured(&self) -> bool;
    async fn probe_health(&self) -> PipelineResult<CapabilityState>;
    async fn generate(&self, req: GenerateRequest<'_>) -> PipelineResult<String>;
}

fn classify_http_error(provider: &str, status: reqwest::StatusCode) -> PipelineError {
    if status.as_u16() == 429 {
        PipelineError::ProviderQuotaExceeded {
            provider: provider.to_string(),
            message: "rate limit exceeded".to_string(),
        }
    } else {
        PipelineError::AiCallTimeout {
            provider: provider.to_string(),
            elapsed_ms: 0,
        }
    }
}

pub struct OpenAiClient {
    api_key: Option<String>,
    http: reqwest::Client,
    health_timeout: Duration,
    call_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            health_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl AiProviderClient for OpenAiClient {
    fn name(&self) -> ProviderName {
        ProviderName::OpenAi
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn probe_health(&self) -> PipelineResult<CapabilityState> {
        let Some(key) = &self.api_key else {
            return Ok(CapabilityState::NotConfigured);
        };
        let resp = self
            .http
            .get("https://api.openai.com/v1/models")
            .bearer_auth(key)
            .timeout(self.health_timeout)
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => Ok(CapabilityState::Available),
            Ok(r) if r.status().as_u16() == 429 => Ok(CapabilityState::QuotaExceeded),
            Ok(r) if r.status().is_server_error() => Ok(CapabilityState::Offline),
            Ok(_) => Ok(CapabilityState::NotConfigured),
            Err(_) => Ok(CapabilityState::Offline),
        }
    }

    async fn generate(&self, req: GenerateRequest<'_>) -> PipelineResult<String> {
        let key = self.api_key.as_deref().ok_or_else(|| PipelineError::NoAvailableAIProvider {
            fallbacks_tried: vec!["openai"],
            decisions: Vec::new(),
        })?;
        let body = json!({
            "model": if req.json_mode { "gpt-4o" } else { "gpt-4o-mini" },
            "messages": [
                {"role": "system", "content": req.system},
                {"role": "user", "content": req.prompt},
            ],
            "response_format": if req.json_mode { json!({"type": "json_object"}) } else { json!(null) },
        });
        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(key)
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|_| PipelineError::AiCallTimeout {
                provider: "openai".to_string(),
                elapsed_ms: self.call_timeout.as_millis() as u64,
            })?;
        if !resp.status().is_success() {
            return Err(classify_http_error("openai", resp.status()));
        }
        let value: serde_json::Value = resp.json().await.map_err(|_| PipelineError::AiCallTimeout {
            provider: "openai".to_string(),
            elapsed_ms: 0,
        })?;
        Ok(value["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string())
    }
}

pub struct GeminiClient {
    api_key: Option<String>,
    http: reqwest::Client,
    health_timeout: Duration,
    call_timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            health_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl AiProviderClient for GeminiClient {
    fn name(&self) -> ProviderName {
        ProviderName::Gemini
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn probe_health(&self) -> PipelineResult<CapabilityState> {
        let Some(key) = &self.api_key else {
            return Ok(CapabilityState::NotConfigured);
        };
        let url = format!("https://generativelanguage.googleapis.com/v1beta/models?key={key}");
        let resp = self.http.get(url).timeout(self.health_timeout).send().await;
        match resp {
            Ok(r) if r.status().is_success() => Ok(CapabilityState::Available),
            Ok(r) if r.status().as_u16() == 429 => Ok(CapabilityState::QuotaExceeded),
            Ok(r) if r.status().is_server_error() => Ok(CapabilityState::Offline),
            Ok(_) => Ok(CapabilityState::NotConfigured),
            Err(_) => Ok(CapabilityState::Offline),
        }
    }

    async fn generate(&self, req: GenerateRequest<'_>) -> PipelineResult<String> {
        let key = self.api_key.as_deref().ok_or_else(|| PipelineError::NoAvailableAIProvider {
            fallbacks_tried: vec!["gemini"],
            decisions: Vec::new(),
        })?;
        let model = if req.json_mode { "gemini-1.5-pro" } else { "gemini-1.5-flash" };
        let url = format!("https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={key}");
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": format!("{}\n\n{}", req.system, req.prompt)}]}],
        });
        let resp = self
            .http
            .post(url)
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|_| PipelineError::AiCallTimeout {
                provider: "gemini".to_string(),
                elapsed_ms: self.call_timeout.as_millis() as u64,
            })?;
        if !resp.status().is_success() {
            return Err(classify_http_error("gemini", resp.status()));
        }
        let value: serde_json::Value = resp.json().await.map_err(|_| PipelineError::AiCallTimeout {
            provider: "gemini".to_string(),
            elapsed_ms: 0,
        })?;
        Ok(value["candidates"][0]["content"]["parts"][0]["text"].as_str().unwrap_or_default().to_string())
    }
}

pub struct AnthropicClient {
    api_key: Option<String>,
    http: reqwest::Client,
    health_timeout: Duration,
    call_timeout: Duration,
}

impl AnthropicClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            http: reqwest::Client::new(),
            health_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl AiProviderClient for AnthropicClient {
    fn name(&self) -> ProviderName {
        ProviderName::Anthropic
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn probe_health(&self) -> PipelineResult<CapabilityState> {
        let Some(key) = &self.api_key else {
            return Ok(CapabilityState::NotConfigured);
        };
        let resp = self
            .http
            .get("https://api.anthropic.com/v1/models")
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .timeout(self.health_timeout)
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => Ok(CapabilityState::Available),
            Ok(r) if r.status().as_u16() == 429 => Ok(CapabilityState::QuotaExceeded),
            Ok(r) if r.status().is_server_error() => Ok(CapabilityState::Offline),
            Ok(_) => Ok(CapabilityState::NotConfigured),
            Err(_) => Ok(CapabilityState::Offline),
        }
    }

    async fn generate(&self, req: GenerateRequest<'_>) -> PipelineResult<String> {
        let key = self.api_key.as_deref().ok_or_else(|| PipelineError::NoAvailableAIProvider {
            fallbacks_tried: vec!["anthropic"],
            decisions: Vec::new(),
        })?;
        let body = json!({
            "model": "claude-3-5-sonnet-latest",
            "max_tokens": 4096,
            "system": req.system,
            "messages": [{"role": "user", "content": req.prompt}],
        });
        let resp = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|_| PipelineError::AiCallTimeout {
                provider: "anthropic".to_string(),
                elapsed_ms: self.call_timeout.as_millis() as u64,
            })?;
        if !resp.status().is_success() {
            return Err(classify_http_error("anthropic", resp.status()));
        }
        let value: serde_json::Value = resp.json().await.map_err(|_| PipelineError::AiCallTimeout {
            provider: "anthropic".to_string(),
            elapsed_ms: 0,
        })?;
        Ok(value["content"][0]["text"].as_str().unwrap_or_default().to_string())
    }
}

/// Ollama is keyed by reachable base URL, not an API key (spec §6 "Ollama
/// base URL and timeout"). Every request sets `keep_alive: 0` so models
/// don't linger resident between jobs (§4.5 "Ollama hygiene").
pub struct OllamaClient {
    base_url: Option<String>,
    http: reqwest::Client,
    health_timeout: Duration,
    call_timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, call_timeout: Duration) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
            health_timeout: Duration::from_secs(5),
            call_timeout,
        }
    }
}

#[async_trait]
impl AiProviderClient for OllamaClient {
    fn name(&self) -> ProviderName {
        ProviderName::Ollama
    }

    fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    async fn probe_health(&self) -> PipelineResult<CapabilityState> {
        let Some(base) = &self.base_url else {
            return Ok(CapabilityState::NotConfigured);
        };
        let resp = self.http.get(format!("{base}/api/tags")).timeout(self.health_timeout).send().await;
        match resp {
            Ok(r) if r.status().is_success() => Ok(CapabilityState::Available),
            Ok(r) if r.status().is_server_error() => Ok(CapabilityState::Offline),
            Ok(_) => Ok(CapabilityState::NotConfigured),
            Err(_) => Ok(CapabilityState::Offline),
        }
    }

    async fn generate(&self, req: GenerateRequest<'_>) -> PipelineResult<String> {
        let base = self.base_url.as_deref().ok_or_else(|| PipelineError::NoAvailableAIProvider {
            fallbacks_tried: vec!["ollama"],
            decisions: Vec::new(),
        })?;
        let body = json!({
            "model": "llama3.1",
            "prompt": format!("{}\n\n{}", req.system, req.prompt),
            "stream": false,
            "format": if req.json_mode { "json" } else { "" },
            "keep_alive": 0,
        });
        let resp = self
            .http
            .post(format!("{base}/api/generate"))
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|_| PipelineError::AiCallTimeout {
                provider: "ollama".to_string(),
                elapsed_ms: self.call_timeout.as_millis() as u64,
            })?;
        if !resp.status().is_success() {
            return Err(classify_http_error("ollama", resp.status()));
        }
        let value: serde_json::Value = resp.json().await.map_err(|_| PipelineError::AiCallTimeout {
            provider: "ollama".to_string(),
            elapsed_ms: 0,
        })?;
        Ok(value["response"].as_str().unwrap_or_default().to_string())
    }
}
