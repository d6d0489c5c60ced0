//! Capability tracking: externally-dependent functions (`text_generation`,
//! `image_generation`) whose operational state is tracked independently of
//! code correctness.
//!
//! Grounded on `backend/ai/capability_manager.py`'s `CapabilityState` /
//! `StatusCategory` pair and `AICapabilityManager.report_status()`'s
//! auto-categorization. Concurrent readers, serialized writers — backed by
//! `dashmap`, the same concurrent-map crate the teacher reaches for in
//! `crates/pagi-core/src/memory` rather than a hand-rolled `RwLock<HashMap>`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CapabilityState {
    Available,
    Limited,
    QuotaExceeded,
    Offline,
    NotConfigured,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCategory {
    ImplementationValid,
    ImplementationInvalid,
    OperationallyLimited,
}

/// Invariant: `QUOTA_EXCEEDED` and `OFFLINE` are never categorized
/// `IMPLEMENTATION_INVALID`.
fn categorize(state: CapabilityState) -> StatusCategory {
    match state {
        CapabilityState::Available => StatusCategory::ImplementationValid,
        CapabilityState::Limited | CapabilityState::QuotaExceeded | CapabilityState::Offline => {
            StatusCategory::OperationallyLimited
        }
        CapabilityState::NotConfigured | CapabilityState::Unknown => StatusCategory::ImplementationInvalid,
    }
}

fn user_message(state: CapabilityState, message: &str) -> String {
    match state {
        CapabilityState::QuotaExceeded => {
            format!("Correctly configured; provider quota temporarily exhausted ({message})")
        }
        CapabilityState::Offline => {
            format!("Correctly configured; provider temporarily unreachable ({message})")
        }
        CapabilityState::NotConfigured => format!("Not configured: {message}"),
        _ => message.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub state: CapabilityState,
    pub category: StatusCategory,
    pub message: String,
    pub user_message: String,
    pub last_updated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_hint: Option<String>,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Process-wide capability tracker. Constructed once by the top-level
/// container and injected into workers, per SPEC_FULL.md §10.2's
/// "no ambient globals" rule — callers hold an `Arc<CapabilityManager>`.
#[derive(Debug, Default)]
pub struct CapabilityManager {
    capabilities: DashMap<String, Capability>,
}

impl CapabilityManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn report_status(&self, name: &str, state: CapabilityState, message: impl Into<String>, resume_hint: Option<String>) {
        let message = message.into();
        let category = categorize(state);
        let capability = Capability {
            name: name.to_string(),
            state,
            category,
            user_message: user_message(state, &message),
            message,
            last_updated: now_ms(),
            resume_hint,
        };
        self.capabilities.insert(name.to_string(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Capability> {
        self.capabilities.get(name).map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<Capability> {
        self.capabilities.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_is_never_implementation_invalid() {
        let mgr = CapabilityManager::new();
        mgr.report_status("text_generation", CapabilityState::QuotaExceeded, "429 from provider", None);
        let cap = mgr.get("text_generation").unwrap();
        assert_eq!(cap.category, StatusCategory::OperationallyLimited);
    }

    #[test]
    fn offline_is_never_implementation_invalid() {
        let mgr = CapabilityManager::new();
        mgr.report_status("text_generation", CapabilityState::Offline, "connection refused", None);
        let cap = mgr.get("text_generation").unwrap();
        assert_eq!(cap.category, StatusCategory::OperationallyLimited);
    }

    #[test]
    fn not_configured_is_implementation_invalid() {
        let mgr = CapabilityManager::new();
        mgr.report_status("image_generation", CapabilityState::NotConfigured, "no api key", None);
        let cap = mgr.get("image_generation").unwrap();
        assert_eq!(cap.category, StatusCategory::ImplementationInvalid);
    }

    #[test]
    fn success_is_implementation_valid() {
        let mgr = CapabilityManager::new();
        mgr.report_status("text_generation", CapabilityState::Available, "ok", None);
        let cap = mgr.get("text_generation").unwrap();
        assert_eq!(cap.category, StatusCategory::ImplementationValid);
    }
}
