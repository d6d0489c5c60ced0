//! Governance / TruthPolicy — named enforcement levels bound to a
//! deployment environment.
//!
//! Grounded on the teacher's `SovereignConfig` env-driven construction
//! (`crates/pagi-core/src/config.rs`), generalized from "load settings" to
//! "derive a fixed rule table from settings". `TruthPolicy` is built once,
//! deterministically, from `GovernanceConfig` — there is no mutable global
//! policy singleton to reset between tests.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    Strict,
    Warn,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl DeploymentEnvironment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => DeploymentEnvironment::Production,
            "staging" => DeploymentEnvironment::Staging,
            _ => DeploymentEnvironment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, DeploymentEnvironment::Production)
    }
}

#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    pub environment: DeploymentEnvironment,
    pub allow_partial_generation: bool,
    pub offline_structural_mode: bool,
}

/// Rules that are STRICT in every environment regardless of config,
/// matching spec §3 TruthPolicy invariants verbatim.
const ALWAYS_STRICT: &[&str] = &[
    "enforce-registry-immutability",
    "fail-on-registry-conflict",
    "enforce-four-plane-structure",
    "enforce-authority-model-selection",
    "prevent-presentation-math",
    "prevent-test-mode-leakage",
];

const ALL_RULES: &[&str] = &[
    "fail-closed-narrative-generation",
    "require-ai-provider",
    "enforce-registry-immutability",
    "prevent-post-lock-registration",
    "fail-on-registry-conflict",
    "enforce-production-strictness",
    "prevent-test-mode-leakage",
    "enforce-four-plane-structure",
    "fail-on-missing-planes",
    "enforce-authority-model-selection",
    "prevent-presentation-math",
];

#[derive(Debug, Clone)]
pub struct TruthPolicy {
    rules: BTreeMap<String, Enforcement>,
}

impl TruthPolicy {
    /// Constructs the policy deterministically. In production,
    /// `allow_partial_generation` and `offline_structural_mode` are
    /// rejected outright rather than silently downgraded — matching the
    /// "rejected at construction" wording in spec §3.
    pub fn build(config: &GovernanceConfig) -> Result<TruthPolicy, String> {
        if config.environment.is_production() {
            if config.allow_partial_generation {
                return Err("allow_partial_generation is not permitted in production".to_string());
            }
            if config.offline_structural_mode {
                return Err("offline_structural_mode is not permitted in production".to_string());
            }
        }

        let mut rules = BTreeMap::new();
        for rule in ALL_RULES {
            let level = if ALWAYS_STRICT.contains(rule) {
                Enforcement::Strict
            } else {
                match config.environment {
                    DeploymentEnvironment::Production => Enforcement::Strict,
                    DeploymentEnvironment::Staging => Enforcement::Warn,
                    DeploymentEnvironment::Development => {
                        if config.offline_structural_mode || config.allow_partial_generation {
                            Enforcement::Warn
                        } else {
                            Enforcement::Strict
                        }
                    }
                }
            };
            rules.insert(rule.to_string(), level);
        }

        Ok(TruthPolicy { rules })
    }

    pub fn enforcement(&self, rule: &str) -> Enforcement {
        self.rules.get(rule).copied().unwrap_or(Enforcement::Strict)
    }

    pub fn is_strict(&self, rule: &str) -> bool {
        self.enforcement(rule) == Enforcement::Strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_rejects_partial_generation_at_construction() {
        let cfg = GovernanceConfig {
            environment: DeploymentEnvironment::Production,
            allow_partial_generation: true,
            offline_structural_mode: false,
        };
        assert!(TruthPolicy::build(&cfg).is_err());
    }

    #[test]
    fn always_strict_rules_remain_strict_in_development() {
        let cfg = GovernanceConfig {
            environment: DeploymentEnvironment::Development,
            allow_partial_generation: true,
            offline_structural_mode: true,
        };
        let policy = TruthPolicy::build(&cfg).unwrap();
        assert!(policy.is_strict("enforce-registry-immutability"));
        assert!(policy.is_strict("fail-on-registry-conflict"));
    }

    #[test]
    fn development_with_offline_mode_downgrades_non_fixed_rules() {
        let cfg = GovernanceConfig {
            environment: DeploymentEnvironment::Development,
            allow_partial_generation: false,
            offline_structural_mode: true,
        };
        let policy = TruthPolicy::build(&cfg).unwrap();
        assert_eq!(policy.enforcement("fail-on-missing-planes"), Enforcement::Warn);
    }
}
