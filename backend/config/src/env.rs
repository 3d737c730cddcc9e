//! Environment handling for config values.
//!
//! Two passes run at load time:
//! - `${VAR_NAME}` substitution in string values. Only uppercase
//!   `[A-Z_][A-Z0-9_]*` names are matched; `$${VAR}` escapes to a literal `${VAR}`.
//! - `STEPFORGE_*` overrides for the handful of settings operators usually
//!   change per deployment.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::schema::StepforgeConfig;

/// Matches `${VAR}` and its escaped form `$${VAR}`; group 1 is the optional escape.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var regex"));

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references in a config JSON value tree.
///
/// Returns an error if any referenced env var is not set or is empty.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    substitute_value(value, &std::env::vars().collect(), "")
}

/// Substitute env vars using a provided map.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => {
            let result: Result<Vec<_>> = arr
                .iter()
                .enumerate()
                .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
                .collect();
            Ok(Value::Array(result?))
        }
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                result.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &regex::Captures| {
        let var_name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{var_name}}}");
        }
        match env.get(var_name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                if missing.is_none() {
                    missing = Some(MissingEnvVarError {
                        var_name: var_name.to_string(),
                        config_path: path.to_string(),
                    });
                }
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(substituted.into_owned())
}

/// Collect all env var names referenced in a config value tree (for diagnostics).
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    let mut vars = Vec::new();
    collect_vars_recursive(value, &mut vars);
    vars.sort();
    vars.dedup();
    vars
}

fn collect_vars_recursive(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in ENV_VAR_PATTERN.captures_iter(s) {
                if caps[1].is_empty() {
                    out.push(caps[2].to_string());
                }
            }
        }
        Value::Array(arr) => arr.iter().for_each(|v| collect_vars_recursive(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_vars_recursive(v, out)),
        _ => {}
    }
}

/// Apply `STEPFORGE_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut StepforgeConfig) {
    apply_env_overrides_with(config, &std::env::vars().collect());
}

/// Apply `STEPFORGE_*` overrides from a provided map.
pub fn apply_env_overrides_with(config: &mut StepforgeConfig, env: &HashMap<String, String>) {
    let get = |key: &str| env.get(key).filter(|v| !v.is_empty()).cloned();

    if let Some(bind) = get("STEPFORGE_BIND") {
        config.server.bind_address = bind;
    }
    if let Some(port) = get("STEPFORGE_PORT") {
        match port.parse() {
            Ok(p) => config.server.port = p,
            Err(_) => debug!(value = %port, "Ignoring non-numeric STEPFORGE_PORT"),
        }
    }
    if let Some(db) = get("STEPFORGE_DB") {
        config.storage.db_path = db;
    }
    if let Some(level) = get("STEPFORGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(url) = get("STEPFORGE_REASONING_URL") {
        config.reasoning.endpoint = Some(url);
    }
    if let Some(url) = get("STEPFORGE_TOOLS_URL") {
        config.tools.endpoint = Some(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_simple_var() {
        let v = json!({"apiKey": "${REASONING_KEY}"});
        let result = resolve_env_vars_with(&v, &env(&[("REASONING_KEY", "sk-abc123")])).unwrap();
        assert_eq!(result["apiKey"], "sk-abc123");
    }

    #[test]
    fn error_on_missing_var() {
        let v = json!({"tools": {"apiKey": "${MISSING_VAR}"}});
        let err = resolve_env_vars_with(&v, &HashMap::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("MISSING_VAR"));
        assert!(msg.contains("tools.apiKey"));
    }

    #[test]
    fn escaped_reference_is_kept_literal() {
        let v = json!({"key": "$${NOT_A_VAR}"});
        let result = resolve_env_vars_with(&v, &HashMap::new()).unwrap();
        assert_eq!(result["key"], "${NOT_A_VAR}");
    }

    #[test]
    fn substitutes_inside_arrays() {
        let v = json!({"caps": ["tool:${TOOL}", "agent:*"]});
        let result = resolve_env_vars_with(&v, &env(&[("TOOL", "search")])).unwrap();
        assert_eq!(result["caps"][0], "tool:search");
        assert_eq!(result["caps"][1], "agent:*");
    }

    #[test]
    fn collects_referenced_vars() {
        let v = json!({"a": "${FOO}", "b": {"c": "${BAR} $${SKIPPED}"}});
        assert_eq!(collect_referenced_vars(&v), vec!["BAR", "FOO"]);
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut cfg = StepforgeConfig::default();
        apply_env_overrides_with(
            &mut cfg,
            &env(&[
                ("STEPFORGE_PORT", "9000"),
                ("STEPFORGE_DB", ":memory:"),
                ("STEPFORGE_REASONING_URL", "http://localhost:7000"),
            ]),
        );
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.storage.db_path, ":memory:");
        assert_eq!(cfg.reasoning.endpoint.as_deref(), Some("http://localhost:7000"));
    }

    #[test]
    fn bad_port_override_is_ignored() {
        let mut cfg = StepforgeConfig::default();
        apply_env_overrides_with(&mut cfg, &env(&[("STEPFORGE_PORT", "abc")]));
        assert_eq!(cfg.server.port, crate::defaults::DEFAULT_PORT);
    }
}
