//! `stepforge-config`: Stepforge runtime configuration management.
//!
//! Provides:
//! - Typed config schema with per-section defaults
//! - YAML read/write with atomic backup rotation
//! - `${ENV_VAR}` substitution and `STEPFORGE_*` overrides
//! - Range validation

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use env::{
    apply_env_overrides, apply_env_overrides_with, collect_referenced_vars, resolve_env_vars,
    resolve_env_vars_with, MissingEnvVarError,
};
pub use io::{config_dir, config_file_path, load_config, write_config};
pub use schema::*;
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Load a config file, resolve env vars, apply overrides and validate.
///
/// This is the main entry point for loading a config at runtime. Validation
/// errors abort the load; warnings are logged.
pub async fn load_and_prepare(path: &Path) -> Result<StepforgeConfig> {
    let raw = io::load_raw(path).await?;
    let value = resolve_env_vars(&raw).context("Failed to resolve env vars in config")?;

    let mut config: StepforgeConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;
    apply_env_overrides(&mut config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.into_iter().next() {
        bail!(first);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_and_prepare_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "scheduler:\n  maxSteps: 0\n").await.unwrap();
        let err = load_and_prepare(&path).await.unwrap_err();
        assert!(err.to_string().contains("scheduler.maxSteps"));
    }

    #[tokio::test]
    async fn test_load_and_prepare_reads_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, "context:\n  keepRecentSteps: 4\n").await.unwrap();
        let cfg = load_and_prepare(&path).await.unwrap();
        assert_eq!(cfg.context.keep_recent_steps, 4);
        assert_eq!(cfg.context.budget_bytes, defaults::DEFAULT_CONTEXT_BUDGET_BYTES);
    }
}
