//! Layer 2: the Registry Proxy — the only way presentation code is allowed
//! to touch a frozen Registry.
//!
//! Grounded on the `ReadOnlyRegistryProxy` / `RegistryValue` pair in
//! `backend/domain/registry_proxy.py`: a wrapper value that forwards
//! equality/ordering/display but turns every arithmetic operator into a
//! raised violation. Rust gives us something the original can't have: the
//! violation is a compile-time absence of `Add`/`Sub`/etc. impls wherever
//! that's enough, and a runtime `PresentationViolation` everywhere the
//! value has to cross a dynamic boundary (template interpolation, JSON).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PipelineError, PipelineResult};
use crate::registry::{Registry, RegistryValue};

/// A Registry value as seen by presentation code.
///
/// Deliberately does not implement `Add`, `Sub`, `Mul`, `Div`, or any
/// numeric trait. Any attempt to do arithmetic has to go through
/// [`ProxyValue::checked_add`] and friends, which always return
/// `PresentationViolation` — there is no "compute a real result" code path
/// to reach for, mirroring the source's `__add__` that raises
/// unconditionally rather than computing-then-raising.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyValue(RegistryValue);

impl ProxyValue {
    fn arithmetic_violation(&self, op: &str) -> PipelineError {
        PipelineError::PresentationViolation(format!(
            "arithmetic operator '{op}' applied to a Registry Proxy value ({:?}); \
             presentation code may not perform arithmetic on frozen Registry values",
            self.0
        ))
    }

    pub fn checked_add(&self, _rhs: &ProxyValue) -> PipelineResult<ProxyValue> {
        Err(self.arithmetic_violation("+"))
    }

    pub fn checked_sub(&self, _rhs: &ProxyValue) -> PipelineResult<ProxyValue> {
        Err(self.arithmetic_violation("-"))
    }

    pub fn checked_mul(&self, _rhs: &ProxyValue) -> PipelineResult<ProxyValue> {
        Err(self.arithmetic_violation("*"))
    }

    pub fn checked_div(&self, _rhs: &ProxyValue) -> PipelineResult<ProxyValue> {
        Err(self.arithmetic_violation("/"))
    }

    /// Raw value for direct template interpolation only — not for further
    /// computation. This is the proxy's one sanctioned escape hatch,
    /// matching `to_display_map()` in the original.
    pub fn raw(&self) -> &RegistryValue {
        &self.0
    }
}

impl fmt::Display for ProxyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for ProxyValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (&self.0, &other.0) {
            (RegistryValue::Int(a), RegistryValue::Int(b)) => a.partial_cmp(b),
            (RegistryValue::Float(a), RegistryValue::Float(b)) => a.partial_cmp(b),
            (RegistryValue::Text(a), RegistryValue::Text(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Read-only view of a frozen [`Registry`]. Construction itself enforces
/// the freeze invariant: there is no way to obtain a proxy over a
/// mutable, unfrozen Registry.
pub struct RegistryProxy<'a> {
    registry: &'a Registry,
}

impl<'a> RegistryProxy<'a> {
    /// Fails if `registry` is not yet frozen — mirrors
    /// `create_presentation_context()` refusing to hand out a proxy before
    /// the source data is stable.
    pub fn new(registry: &'a Registry) -> PipelineResult<Self> {
        if !registry.is_frozen() {
            return Err(PipelineError::PipelineViolation {
                attempted: "RegistryProxy::new",
                required: "REGISTRY_LOCKED",
                actual: "registry not frozen".to_string(),
            });
        }
        Ok(Self { registry })
    }

    pub fn get(&self, key: &str) -> Option<ProxyValue> {
        self.registry.get(key).map(|e| ProxyValue(e.value.clone()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.registry.contains(key)
    }

    /// Raw values for direct template interpolation. Never perform further
    /// computation on the result of this call.
    pub fn to_display_map(&self) -> BTreeMap<String, RegistryValue> {
        self.registry.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryEntry;

    fn frozen_registry() -> Registry {
        let mut reg = Registry::new();
        reg.register(RegistryEntry::fact("asking_price_eur", 450_000_i64, "Asking price", "test"))
            .unwrap();
        reg.freeze().unwrap();
        reg
    }

    #[test]
    fn proxy_refuses_unfrozen_registry() {
        let reg = Registry::new();
        assert!(RegistryProxy::new(&reg).is_err());
    }

    #[test]
    fn arithmetic_is_always_a_violation() {
        let reg = frozen_registry();
        let proxy = RegistryProxy::new(&reg).unwrap();
        let price = proxy.get("asking_price_eur").unwrap();
        let bump = ProxyValue(RegistryValue::Int(1000));
        let err = price.checked_add(&bump).unwrap_err();
        assert!(matches!(err, PipelineError::PresentationViolation(_)));
    }

    #[test]
    fn display_map_returns_raw_values() {
        let reg = frozen_registry();
        let proxy = RegistryProxy::new(&reg).unwrap();
        let map = proxy.to_display_map();
        assert_eq!(map.get("asking_price_eur"), Some(&RegistryValue::Int(450_000)));
    }
}
