//! The AI Authority: the single gate through which any AI work is
//! contracted. No other component reads provider API keys or chooses a
//! model.
//!
//! Grounded on `backend/ai/ai_authority.py` / `provider_factory.py`: fixed
//! provider hierarchy, cached decision with TTL, and cascade-on-failure
//! during generation. Decision caching matches the "guarded, read-mostly
//! with bounded TTL" resource policy in spec §5.

use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::ai::capability::{CapabilityManager, CapabilityState};
use crate::ai::client::{AiProviderClient, GenerateRequest, ProviderName, PROVIDER_HIERARCHY};
use crate::error::{PipelineError, PipelineResult, ProviderDecisionEntry};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedDecision {
    provider: ProviderName,
    at: Instant,
}

pub struct AiAuthority {
    clients: Vec<Box<dyn AiProviderClient>>,
    capability_manager: std::sync::Arc<CapabilityManager>,
    cache: RwLock<Option<CachedDecision>>,
    cache_ttl: Duration,
    // Guards the key-material load step (spec §4.5 step 1: "load once,
    // cached until invalidate()"); probing itself needs no lock since each
    // client is read-only after construction.
    invalidate_lock: Mutex<()>,
}

impl AiAuthority {
    /// `clients` must be supplied in hierarchy order
    /// (openai, gemini, anthropic, ollama); callers build them from
    /// `Settings` once at startup.
    pub fn new(clients: Vec<Box<dyn AiProviderClient>>, capability_manager: std::sync::Arc<CapabilityManager>) -> Self {
        Self {
            clients,
            capability_manager,
            cache: RwLock::new(None),
            cache_ttl: DEFAULT_CACHE_TTL,
            invalidate_lock: Mutex::new(()),
        }
    }

    fn client_for(&self, name: ProviderName) -> Option<&dyn AiProviderClient> {
        self.clients.iter().find(|c| c.name() == name).map(|c| c.as_ref())
    }

    /// Forces the next `resolve()` to re-probe instead of returning the
    /// cached decision.
    pub fn invalidate(&self) {
        let _guard = self.invalidate_lock.lock().unwrap();
        *self.cache.write().unwrap() = None;
    }

    fn cached_provider(&self) -> Option<ProviderName> {
        let cache = self.cache.read().unwrap();
        cache.as_ref().filter(|c| c.at.elapsed() < self.cache_ttl).map(|c| c.provider)
    }

    /// Probes every provider in hierarchy order regardless of outcome and
    /// reports per-provider configured/operational/reason state, also
    /// recording each probe's health on the `text_generation` capability.
    /// Used by `resolve` to pick a provider and by status surfaces that
    /// need the full picture rather than just the winner.
    pub async fn provider_report(&self) -> Vec<ProviderDecisionEntry> {
        let mut decisions = Vec::new();
        for &name in &PROVIDER_HIERARCHY {
            let Some(client) = self.client_for(name) else {
                decisions.push(ProviderDecisionEntry {
                    provider: name.as_str(),
                    configured: false,
                    operational: false,
                    reason: "no client registered for this provider".to_string(),
                });
                continue;
            };

            if !client.is_configured() {
                decisions.push(ProviderDecisionEntry {
                    provider: name.as_str(),
                    configured: false,
                    operational: false,
                    reason: "not configured".to_string(),
                });
                continue;
            }

            let state = client.probe_health().await.unwrap_or(CapabilityState::Offline);
            self.capability_manager.report_status("text_generation", state, format!("{:?}", state), None);

            decisions.push(ProviderDecisionEntry {
                provider: name.as_str(),
                configured: true,
                operational: state == CapabilityState::Available,
                reason: format!("{:?}", state),
            });
        }
        decisions
    }

    /// Probes providers in hierarchy order and returns the first one that
    /// is both configured and operational. Caches the decision with a
    /// short TTL; `force_refresh` bypasses the cache.
    pub async fn resolve(&self, force_refresh: bool) -> PipelineResult<ProviderName> {
        if !force_refresh {
            if let Some(cached) = self.cached_provider() {
                return Ok(cached);
            }
        }

        let decisions = self.provider_report().await;
        if let Some(winner) = decisions.iter().find(|d| d.operational) {
            let name = PROVIDER_HIERARCHY.iter().copied().find(|p| p.as_str() == winner.provider).expect("decision provider names are drawn from PROVIDER_HIERARCHY");
            *self.cache.write().unwrap() = Some(CachedDecision { provider: name, at: Instant::now() });
            info!(provider = name.as_str(), "AI Authority selected provider");
            return Ok(name);
        }

        warn!("AI Authority found no operational provider");
        Err(PipelineError::NoAvailableAIProvider {
            fallbacks_tried: PROVIDER_HIERARCHY.iter().map(|p| p.as_str()).collect(),
            decisions,
        })
    }

    /// Resolves a provider, calls it, and cascades to the next
    /// hierarchy member on quota/timeout failure until one succeeds or
    /// the hierarchy is exhausted.
    pub async fn generate_text(&self, prompt: &str, system: &str, json_mode: bool) -> PipelineResult<(String, ProviderName)> {
        let mut tried: Vec<&'static str> = Vec::new();
        let mut decisions = Vec::new();
        let mut start = self.resolve(false).await?;

        loop {
            let client = self.client_for(start).expect("resolve() only returns registered providers");
            let req = GenerateRequest { prompt, system, json_mode, images: None };
            match client.generate(req).await {
                Ok(text) => {
                    self.capability_manager.report_status("text_generation", CapabilityState::Available, "generation succeeded", None);
                    return Ok((text, start));
                }
                Err(PipelineError::ProviderQuotaExceeded { provider, message }) => {
                    self.capability_manager.report_status("text_generation", CapabilityState::QuotaExceeded, message.clone(), None);
                    decisions.push(ProviderDecisionEntry {
                        provider: start.as_str(),
                        configured: true,
                        operational: false,
                        reason: format!("quota exceeded: {message}"),
                    });
                    tried.push(start.as_str());
                    warn!(provider = %provider, "provider quota exceeded, cascading");
                }
                Err(PipelineError::AiCallTimeout { provider, elapsed_ms }) => {
                    self.capability_manager.report_status("text_generation", CapabilityState::Offline, format!("timeout after {elapsed_ms}ms"), None);
                    decisions.push(ProviderDecisionEntry {
                        provider: start.as_str(),
                        configured: true,
                        operational: false,
                        reason: "timed out".to_string(),
                    });
                    tried.push(start.as_str());
                    warn!(provider = %provider, "provider call timed out, cascading");
                }
                Err(other) => return Err(other),
            }

            self.invalidate();
            let next = PROVIDER_HIERARCHY
                .iter()
                .copied()
                .skip_while(|p| *p != start)
                .skip(1)
                .find(|p| self.client_for(*p).is_some_and(|c| c.is_configured()));

            match next {
                Some(n) => start = n,
                None => {
                    return Err(PipelineError::NoAvailableAIProvider {
                        fallbacks_tried: tried,
                        decisions,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        provider: ProviderName,
        configured: bool,
        health: CapabilityState,
        calls: AtomicUsize,
        fail_with_quota: bool,
    }

    #[async_trait]
    impl AiProviderClient for FakeClient {
        fn name(&self) -> ProviderName {
            self.provider
        }
        fn is_configured(&self) -> bool {
            self.configured
        }
        async fn probe_health(&self) -> PipelineResult<CapabilityState> {
            Ok(self.health)
        }
        async fn generate(&self, _req: GenerateRequest<'_>) -> PipelineResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_quota {
                Err(PipelineError::ProviderQuotaExceeded {
                    provider: self.provider.as_str().to_string(),
                    message: "too many requests".to_string(),
                })
            } else {
                Ok("generated text".to_string())
            }
        }
    }

    #[tokio::test]
    async fn resolve_picks_highest_tier_operational_provider() {
        let clients: Vec<Box<dyn AiProviderClient>> = vec![
            Box::new(FakeClient { provider: ProviderName::OpenAi, configured: false, health: CapabilityState::NotConfigured, calls: AtomicUsize::new(0), fail_with_quota: false }),
            Box::new(FakeClient { provider: ProviderName::Gemini, configured: true, health: CapabilityState::Available, calls: AtomicUsize::new(0), fail_with_quota: false }),
        ];
        let authority = AiAuthority::new(clients, CapabilityManager::new());
        let chosen = authority.resolve(false).await.unwrap();
        assert_eq!(chosen, ProviderName::Gemini);
    }

    #[tokio::test]
    async fn no_configured_provider_yields_no_available_provider_error() {
        let clients: Vec<Box<dyn AiProviderClient>> = vec![Box::new(FakeClient {
            provider: ProviderName::OpenAi,
            configured: false,
            health: CapabilityState::NotConfigured,
            calls: AtomicUsize::new(0),
            fail_with_quota: false,
        })];
        let authority = AiAuthority::new(clients, CapabilityManager::new());
        let err = authority.resolve(false).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoAvailableAIProvider { .. }));
    }

    #[tokio::test]
    async fn quota_exceeded_cascades_to_next_provider() {
        let clients: Vec<Box<dyn AiProviderClient>> = vec![
            Box::new(FakeClient { provider: ProviderName::OpenAi, configured: true, health: CapabilityState::Available, calls: AtomicUsize::new(0), fail_with_quota: true }),
            Box::new(FakeClient { provider: ProviderName::Gemini, configured: true, health: CapabilityState::Available, calls: AtomicUsize::new(0), fail_with_quota: false }),
        ];
        let authority = AiAuthority::new(clients, CapabilityManager::new());
        let (text, provider) = authority.generate_text("prompt", "system", false).await.unwrap();
        assert_eq!(text, "generated text");
        assert_eq!(provider, ProviderName::Gemini);
    }
}
