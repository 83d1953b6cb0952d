use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use csrc_portfolio::{ConfigError, CorrelationConfig, EnsembleConfig, ParticleConfig, Universe};
use csrc_risk::{RiskLimits, SizerConfig, SizingConfigError};

/// Audit boundary tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// `sys.correlation_update` fires when any metric moves by more than this.
    pub metrics_change_threshold: f64,
    /// Outbox size; the oldest pending event is dropped past it.
    pub buffer_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            metrics_change_threshold: 0.01,
            buffer_capacity: 1024,
        }
    }
}

impl AuditConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.metrics_change_threshold;
        if !(t.is_finite() && t >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "audit.metrics_change_threshold",
                value: t,
                expected: ">= 0",
            });
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "audit.buffer_capacity",
                value: 0.0,
                expected: ">= 1",
            });
        }
        Ok(())
    }
}

/// Typed validation failure for an [`EngineConfig`].
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValidationError {
    Portfolio(ConfigError),
    Sizing(SizingConfigError),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Portfolio(e) => write!(f, "{e}"),
            Self::Sizing(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

impl From<ConfigError> for ConfigValidationError {
    fn from(e: ConfigError) -> Self {
        Self::Portfolio(e)
    }
}

impl From<SizingConfigError> for ConfigValidationError {
    fn from(e: SizingConfigError) -> Self {
        Self::Sizing(e)
    }
}

/// Everything needed to build an allocation engine. Set once at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub strategies: Vec<String>,
    pub correlation: CorrelationConfig,
    pub particles: ParticleConfig,
    pub ensemble: EnsembleConfig,
    pub sizing: SizerConfig,
    pub risk_limits: RiskLimits,
    pub audit: AuditConfig,
}

impl EngineConfig {
    /// Defaults for every section over the given strategy ids.
    pub fn with_strategies<I, S>(strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            strategies: strategies.into_iter().map(Into::into).collect(),
            correlation: CorrelationConfig::default(),
            particles: ParticleConfig::default(),
            ensemble: EnsembleConfig::default(),
            sizing: SizerConfig::default(),
            risk_limits: RiskLimits::default(),
            audit: AuditConfig::default(),
        }
    }

    /// Parse a merged config document. Missing sections take their defaults;
    /// `/engine/strategies` is required. Range checks are left to
    /// [`EngineConfig::validate`].
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let strategies = match config_json.pointer("/engine/strategies") {
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item.as_str() {
                        Some(s) => out.push(s.to_string()),
                        None => bail!("CONFIG_INVALID: /engine/strategies/{i} must be a string"),
                    }
                }
                out
            }
            Some(_) => bail!("CONFIG_INVALID: /engine/strategies must be a list of strategy ids"),
            None => bail!("CONFIG_INVALID: /engine/strategies is required"),
        };

        Ok(Self {
            strategies,
            correlation: section(config_json, "correlation")?,
            particles: section(config_json, "particles")?,
            ensemble: section(config_json, "ensemble")?,
            sizing: section(config_json, "sizing")?,
            risk_limits: section(config_json, "risk_limits")?,
            audit: section(config_json, "audit")?,
        })
    }

    /// Parse then validate; range failures surface as `CONFIG_INVALID`.
    pub fn from_config_json_validated(config_json: &Value) -> Result<Self> {
        let cfg = Self::from_config_json(config_json)?;
        if let Err(e) = cfg.validate() {
            bail!("CONFIG_INVALID: {e}");
        }
        Ok(cfg)
    }

    pub fn universe(&self) -> Result<Universe, ConfigError> {
        Universe::new(self.strategies.iter().cloned())
    }

    /// Every section's range checks, first failure wins.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.universe()?;
        self.correlation.validate()?;
        self.particles.validate()?;
        self.ensemble.validate()?;
        self.sizing.validate()?;
        self.risk_limits.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

/// Deserialize `/<name>`; absent or null means all defaults.
fn section<T: DeserializeOwned + Default>(config_json: &Value, name: &str) -> Result<T> {
    match config_json.get(name) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v.clone())
            .with_context(|| format!("CONFIG_INVALID: section /{name}")),
    }
}
