//! The closed error family the Pipeline Spine matches exhaustively.
//!
//! Every structural, validation, and operational failure in this crate is a
//! variant of [`PipelineError`]. The Spine is the only place that converts
//! one of these into a run status; nothing downstream re-interprets a
//! `String`.

use std::fmt;

use serde::Serialize;

/// A four-plane structural violation: which plane it was found in, what
/// kind, and a human-readable detail for the diagnostics record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneViolationDetail {
    pub chapter_id: u32,
    pub source_plane: &'static str,
    pub violation_type: &'static str,
    pub details: String,
}

impl fmt::Display for PlaneViolationDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chapter {} plane {} {}: {}",
            self.chapter_id, self.source_plane, self.violation_type, self.details
        )
    }
}

/// Per-provider state as observed during an AI Authority resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDecisionEntry {
    pub provider: &'static str,
    pub configured: bool,
    pub operational: bool,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("registry conflict on key '{key}': existing={existing}, attempted={attempted}")]
    RegistryConflict {
        key: String,
        existing: String,
        attempted: String,
    },

    #[error("registry is locked: cannot register '{key}' after freeze")]
    RegistryLocked { key: String },

    #[error("pipeline phase violation: {attempted} requires phase {required:?}, was in {actual:?}")]
    PipelineViolation {
        attempted: &'static str,
        required: &'static str,
        actual: String,
    },

    #[error("chapter {0} validation failed with {1} violation(s)")]
    ValidationFailure(u32, usize),

    #[error("plane violation: {0}")]
    PlaneViolation(PlaneViolationDetail),

    #[error("AI output violation for chapter {chapter_id}: {violations:?}")]
    AIOutputViolation {
        chapter_id: u32,
        violations: Vec<String>,
    },

    #[error("no AI provider available; tried {fallbacks_tried:?}")]
    NoAvailableAIProvider {
        fallbacks_tried: Vec<&'static str>,
        decisions: Vec<ProviderDecisionEntry>,
    },

    #[error("presentation violation: {0}")]
    PresentationViolation(String),

    #[error("AI call to {provider} timed out after {elapsed_ms}ms")]
    AiCallTimeout { provider: String, elapsed_ms: u64 },

    #[error("provider {provider} quota exceeded: {message}")]
    ProviderQuotaExceeded { provider: String, message: String },

    #[error("run was cancelled")]
    Cancelled,
}

pub type PipelineResult<T> = Result<T, PipelineError>;
