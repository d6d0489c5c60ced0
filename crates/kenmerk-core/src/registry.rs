//! Layer 1: the Canonical Registry — single source of truth for every fact,
//! derived variable, KPI, and explicit uncertainty a run produces.
//!
//! Mirrors the teacher's sled-backed `KnowledgeStore` in shape (typed
//! records keyed by string id, append-only within a slot) but is a plain
//! in-memory ordered map: the Registry lives for exactly one run and is
//! never the thing that needs to survive a process restart — the Run Store
//! is (see `kenmerk-gateway::run_store`).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// The four kinds of Registry entries (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Fact,
    Variable,
    Kpi,
    Uncertainty,
}

/// A heterogeneous Registry value: scalar, list, or mapping.
///
/// Replaces the source language's dynamic typing (Design Note §9) with a
/// discriminated variant. Untagged serde so the wire shape stays a plain
/// JSON scalar/array/object, matching the `chapters` payload shown in
/// spec §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<RegistryValue>),
    Map(BTreeMap<String, RegistryValue>),
}

impl RegistryValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RegistryValue::Int(v) => Some(*v),
            RegistryValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegistryValue::Int(v) => Some(*v as f64),
            RegistryValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegistryValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[RegistryValue]> {
        match self {
            RegistryValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RegistryValue::Null)
    }
}

impl fmt::Display for RegistryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryValue::Null => write!(f, ""),
            RegistryValue::Bool(b) => write!(f, "{b}"),
            RegistryValue::Int(v) => write!(f, "{v}"),
            RegistryValue::Float(v) => write!(f, "{v}"),
            RegistryValue::Text(s) => write!(f, "{s}"),
            RegistryValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
            RegistryValue::Map(_) => write!(f, "<map>"),
        }
    }
}

impl From<i64> for RegistryValue {
    fn from(v: i64) -> Self {
        RegistryValue::Int(v)
    }
}

impl From<&str> for RegistryValue {
    fn from(v: &str) -> Self {
        RegistryValue::Text(v.to_string())
    }
}

impl From<String> for RegistryValue {
    fn from(v: String) -> Self {
        RegistryValue::Text(v)
    }
}

/// An immutable Registry record. Once registered, never mutated in place —
/// a conflicting re-registration is rejected rather than overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    pub kind: EntryKind,
    pub value: RegistryValue,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub source: String,
    pub confidence: f32,
    pub complete: bool,
    #[serde(default)]
    pub derived_from: Vec<String>,
}

impl RegistryEntry {
    pub fn fact(id: impl Into<String>, value: impl Into<RegistryValue>, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: EntryKind::Fact,
            value: value.into(),
            name: name.into(),
            unit: None,
            source: source.into(),
            confidence: 1.0,
            complete: true,
            derived_from: Vec::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_derived_from(mut self, derived_from: Vec<String>) -> Self {
        self.derived_from = derived_from;
        self
    }
}

/// Layer 1: the Canonical Registry.
///
/// Lifecycle: created empty, populated only during Enrichment, frozen
/// exactly once. Reads are permitted forever; any write after freeze is
/// fatal (`REGISTRY_LOCKED`). Re-registering a key with a different value
/// is fatal (`REGISTRY_CONFLICT`); re-registering with the same value is a
/// no-op.
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<String, RegistryEntry>,
    frozen: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Additive-only registration. Fails with `REGISTRY_LOCKED` after
    /// `freeze()`, or `REGISTRY_CONFLICT` when re-registering a key with a
    /// different value. Same value is a no-op.
    pub fn register(&mut self, entry: RegistryEntry) -> PipelineResult<()> {
        if self.frozen {
            return Err(PipelineError::RegistryLocked { key: entry.id });
        }
        if let Some(existing) = self.entries.get(&entry.id) {
            if existing.value != entry.value {
                return Err(PipelineError::RegistryConflict {
                    key: entry.id.clone(),
                    existing: existing.value.to_string(),
                    attempted: entry.value.to_string(),
                });
            }
            return Ok(());
        }
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&RegistryEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegistryEntry)> {
        self.entries.iter()
    }

    /// Flat key -> value view for read-only consumers (Registry Proxy,
    /// CoreSummary builder).
    pub fn snapshot(&self) -> BTreeMap<String, RegistryValue> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Idempotent-once. A second call is fatal.
    pub fn freeze(&mut self) -> PipelineResult<()> {
        if self.frozen {
            return Err(PipelineError::RegistryLocked {
                key: "<freeze-already-called>".to_string(),
            });
        }
        self.frozen = true;
        Ok(())
    }

    /// Keys registered as UNCERTAINTY or explicitly incomplete.
    pub fn incomplete_keys(&self) -> Vec<&str> {
        self.entries
            .values()
            .filter(|e| !e.complete || e.kind == EntryKind::Uncertainty)
            .map(|e| e.id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_same_value_is_noop() {
        let mut reg = Registry::new();
        let e = RegistryEntry::fact("price", 100_i64, "Price", "test");
        reg.register(e.clone()).unwrap();
        reg.register(e).unwrap();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn register_conflicting_value_is_fatal() {
        let mut reg = Registry::new();
        reg.register(RegistryEntry::fact("price", 100_i64, "Price", "test")).unwrap();
        let err = reg
            .register(RegistryEntry::fact("price", 200_i64, "Price", "test"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::RegistryConflict { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn register_after_freeze_is_fatal() {
        let mut reg = Registry::new();
        reg.freeze().unwrap();
        let err = reg
            .register(RegistryEntry::fact("price", 100_i64, "Price", "test"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::RegistryLocked { .. }));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn freeze_twice_is_fatal() {
        let mut reg = Registry::new();
        reg.freeze().unwrap();
        assert!(reg.freeze().is_err());
    }

    #[test]
    fn get_missing_key_is_none() {
        let reg = Registry::new();
        assert!(reg.get("nope").is_none());
    }
}
