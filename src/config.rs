//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data: every field has a default, so a TOML
//! file only needs to name what it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Policy for calls to predicates with no clauses.
///
/// Only `unknown(fail)` is supported: an undefined predicate has no answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    #[default]
    Fail,
}

/// Which knowledge-compiler backend turns the CNF into a circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilerBackend {
    /// DPLL trace with component decomposition and caching.
    #[default]
    DecisionDnnf,
    /// Plain DPLL trace (a decision tree with unit propagation).
    DecisionTree,
}

impl std::fmt::Display for CompilerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompilerBackend::DecisionDnnf => write!(f, "decision-dnnf"),
            CompilerBackend::DecisionTree => write!(f, "decision-tree"),
        }
    }
}

/// Sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// RNG seed. `None` seeds from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Consecutive rejected samples before rejection sampling gives up.
    #[serde(default = "default_max_rejections")]
    pub max_rejections: usize,
}

fn default_max_rejections() -> usize {
    100_000
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: None,
            max_rejections: default_max_rejections(),
        }
    }
}

/// Configuration for the probalog engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Use the occurs check during resolution.
    #[serde(default)]
    pub occurs_check: bool,
    /// Undefined-predicate policy.
    #[serde(default)]
    pub unknown: UnknownPolicy,
    /// Knowledge-compiler backend.
    #[serde(default)]
    pub compiler: CompilerBackend,
    /// Wall-clock bound for one grounding + compilation pass.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    /// Sampler settings.
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            occurs_check: false,
            unknown: UnknownPolicy::Fail,
            compiler: CompilerBackend::DecisionDnnf,
            timeout_secs: None,
            sampling: SamplingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.timeout_secs {
            if !t.is_finite() || t <= 0.0 {
                return Err(ConfigError::Invalid {
                    message: format!("timeout_secs must be a positive number, got {t}"),
                });
            }
        }
        if self.sampling.max_rejections == 0 {
            return Err(ConfigError::Invalid {
                message: "sampling.max_rejections must be > 0".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert!(!cfg.occurs_check);
        assert_eq!(cfg.compiler, CompilerBackend::DecisionDnnf);
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            occurs_check = true
            compiler = "decision_tree"
            timeout_secs = 2.5

            [sampling]
            seed = 42
            "#,
        )
        .unwrap();
        assert!(cfg.occurs_check);
        assert_eq!(cfg.compiler, CompilerBackend::DecisionTree);
        assert_eq!(cfg.timeout_secs, Some(2.5));
        assert_eq!(cfg.sampling.seed, Some(42));
        assert_eq!(cfg.sampling.max_rejections, 100_000);
    }

    #[test]
    fn invalid_timeout_rejected() {
        let err = EngineConfig::from_toml_str("timeout_secs = -1.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn unknown_error_policy_rejected() {
        let err = EngineConfig::from_toml_str("unknown = \"error\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut cfg = EngineConfig::default();
        cfg.sampling.seed = Some(7);
        std::fs::write(&path, cfg.to_toml_string().unwrap()).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/probalog.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
