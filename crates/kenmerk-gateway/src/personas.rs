//! Loads the persona preference config every run is enriched against.
//! Grounded on `CoreConfig::load`'s precedence (env path override > file >
//! built-in defaults) using the same `config` crate, but simplified: there
//! is no environment-variable overlay here, only an optional TOML file,
//! since personas are a small, rarely-changed roster rather than runtime
//! toggles.

use std::path::Path;

use kenmerk_core::{PersonaPreferences, PreferenceConfig};

const DEFAULT_PERSONAS_PATH: &str = "config/personas.toml";

/// Built-in roster matching the two personas named throughout spec §8's
/// worked examples.
fn default_preference_config() -> PreferenceConfig {
    PreferenceConfig {
        personas: vec![
            PersonaPreferences {
                name: "marcel".to_string(),
                priorities: vec!["Garage".to_string(), "Zonnepanelen".to_string(), "Jaren 30".to_string()],
            },
            PersonaPreferences {
                name: "petra".to_string(),
                priorities: vec!["Tuin".to_string(), "Open keuken".to_string(), "Warmtepomp".to_string()],
            },
        ],
    }
}

/// Loads personas from `KENMERK_PERSONAS_PATH` (default
/// `config/personas.toml`) if present, falling back to the built-in
/// roster when the file is absent, unreadable, or empty.
pub fn load_preferences() -> PreferenceConfig {
    let config_path = std::env::var("KENMERK_PERSONAS_PATH").unwrap_or_else(|_| DEFAULT_PERSONAS_PATH.to_string());
    let path = Path::new(&config_path);
    if !path.exists() {
        return default_preference_config();
    }

    let built = config::Config::builder().add_source(config::File::from(path)).build();
    match built.and_then(|c| c.try_deserialize::<PreferenceConfig>()) {
        Ok(cfg) if !cfg.personas.is_empty() => cfg,
        Ok(_) => default_preference_config(),
        Err(err) => {
            tracing::warn!(target: "kenmerk::personas", path = %config_path, error = %err, "failed to load persona config, using defaults");
            default_preference_config()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roster_has_marcel_and_petra() {
        let prefs = default_preference_config();
        let names: Vec<&str> = prefs.personas.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"marcel"));
        assert!(names.contains(&"petra"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        std::env::set_var("KENMERK_PERSONAS_PATH", "/nonexistent/path/personas.toml");
        let prefs = load_preferences();
        assert_eq!(prefs.personas.len(), 2);
        std::env::remove_var("KENMERK_PERSONAS_PATH");
    }
}
