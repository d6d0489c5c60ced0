//! Ollama hygiene guard: reclaims local model memory between jobs.
//!
//! Grounded on `backend/ai/ollama_guard.py`-equivalent behavior described
//! in spec §4.5 ("Ollama hygiene"): every request already sets
//! `keep_alive: 0` (see `OllamaClient::generate`), and this guard offers
//! the explicit cleanup operations callers run between jobs to reclaim
//! anything that still lingered.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Clone)]
pub struct OllamaGuard {
    base_url: String,
    http: reqwest::Client,
    inspect_timeout: Duration,
}

impl OllamaGuard {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            inspect_timeout: Duration::from_secs(10),
        }
    }

    /// Lists model names Ollama currently reports as loaded.
    pub async fn detect_processes(&self) -> PipelineResult<Vec<String>> {
        let resp = self
            .http
            .get(format!("{}/api/ps", self.base_url))
            .timeout(self.inspect_timeout)
            .send()
            .await
            .map_err(|_| PipelineError::AiCallTimeout {
                provider: "ollama".to_string(),
                elapsed_ms: self.inspect_timeout.as_millis() as u64,
            })?;
        let tags: TagsResponse = resp.json().await.unwrap_or(TagsResponse { models: Vec::new() });
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Issues a zero-duration keep-alive generate call for every
    /// currently-loaded model, which Ollama treats as an unload request.
    pub async fn unload_all(&self) -> PipelineResult<usize> {
        let loaded = self.detect_processes().await?;
        let mut unloaded = 0;
        for model in &loaded {
            let body = serde_json::json!({ "model": model, "keep_alive": 0 });
            if self
                .http
                .post(format!("{}/api/generate", self.base_url))
                .timeout(self.inspect_timeout)
                .json(&body)
                .send()
                .await
                .is_ok()
            {
                unloaded += 1;
            }
        }
        Ok(unloaded)
    }

    /// Full cleanup pass between jobs. `kill_lingering` additionally
    /// re-checks after the unload request and reports anything still
    /// resident so the caller can log it rather than silently trust the
    /// unload succeeded.
    pub async fn cleanup(&self, kill_lingering: bool) -> PipelineResult<Vec<String>> {
        self.unload_all().await?;
        if kill_lingering {
            self.detect_processes().await
        } else {
            Ok(Vec::new())
        }
    }
}
