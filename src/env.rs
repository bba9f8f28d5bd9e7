//! Environment settings and `${VAR}` substitution
//!
//! Provider settings are looked up under the `TF_VAR_` prefix first and the
//! `OCI_` prefix second, so a CI job can export either form. Configuration
//! files may reference environment variables with the `${VAR_NAME}` syntax.

use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

/// Prefixes consulted, in order, when resolving a provider setting
pub const SETTING_PREFIXES: [&str; 2] = ["TF_VAR_", "OCI_"];

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid pattern"));

/// Look up a provider setting, returning `None` when unset or empty.
pub fn env_setting(name: &str) -> Option<String> {
    SETTING_PREFIXES.iter().find_map(|prefix| {
        env::var(format!("{}{}", prefix, name))
            .ok()
            .filter(|v| !v.is_empty())
    })
}

/// Look up a provider setting, or fall back to `default`.
pub fn env_setting_or(name: &str, default: &str) -> String {
    env_setting(name).unwrap_or_else(|| default.to_string())
}

/// Look up a provider setting that must be present.
///
/// Absence is a setup failure: callers are expected to abort before doing
/// any work.
pub fn required_env_setting(name: &str) -> Result<String, ConfigError> {
    env_setting(name).ok_or_else(|| ConfigError::MissingSetting {
        name: name.to_string(),
        tried: SETTING_PREFIXES
            .iter()
            .map(|p| format!("{}{}", p, name))
            .collect(),
    })
}

/// Substitute `${VAR_NAME}` references with environment values.
///
/// Every missing variable is reported in one error.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let output = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match env::var(name) {
            Ok(value) => value,
            Err(_) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingVariables(missing));
    }

    Ok(output.into_owned())
}
