//! Configuration for the nlforge expression-constraint engine.
//!
//! Load engine tolerances and limits from TOML files to tune propagation,
//! separation, and numerics without code changes.
//!
//! # Examples
//!
//! ```
//! use nlforge_config::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str(r#"
//!     feastol = 1e-6
//!     max_prop_rounds = 5
//!
//!     [separation]
//!     min_cut_violation = 1e-4
//! "#).unwrap();
//!
//! assert_eq!(config.max_prop_rounds, 5);
//! ```
//!
//! Use defaults when the file is missing:
//!
//! ```
//! use nlforge_config::EngineConfig;
//!
//! let config = EngineConfig::load("engine.toml").unwrap_or_default();
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine-wide numeric tolerances and limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct EngineConfig {
    /// Feasibility tolerance used for violation checks and redundancy
    /// detection.
    pub feastol: f64,

    /// General epsilon for comparing bounds for equality.
    pub epsilon: f64,

    /// Minimum relative bound improvement for a tightening to be applied.
    pub bound_strengthen_tol: f64,

    /// Absolute amount by which variable bounds are relaxed before forward
    /// propagation (never across integer values for integer variables).
    pub var_bound_relax: f64,

    /// Maximum number of forward/reverse propagation rounds per call.
    pub max_prop_rounds: u32,

    /// Separation settings.
    pub separation: SeparationConfig,

    /// Quadratic-handler settings.
    pub quadratic: QuadraticConfig,
}

/// Cut-generation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SeparationConfig {
    /// Minimum violation of a node's auxiliary relation before cuts are
    /// attempted for it.
    pub min_activity_violation: f64,

    /// Minimum violation a finished cut must achieve to enter the LP.
    pub min_cut_violation: f64,

    /// Maximum ratio between the largest and smallest absolute cut
    /// coefficient; rows beyond it are discarded as numerically unsafe.
    pub max_coef_range: f64,

    /// Coefficients below this magnitude are dropped during cleanup.
    pub min_coef: f64,
}

/// Settings of the quadratic nonlinear handler.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct QuadraticConfig {
    /// Maximum Jacobi sweeps for the symmetric eigenvalue iteration.
    pub max_eig_sweeps: u32,

    /// Off-diagonal tolerance at which the eigenvalue iteration stops.
    pub eig_tol: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            feastol: 1e-6,
            epsilon: 1e-9,
            bound_strengthen_tol: 1e-5,
            var_bound_relax: 1e-9,
            max_prop_rounds: 10,
            separation: SeparationConfig::default(),
            quadratic: QuadraticConfig::default(),
        }
    }
}

impl Default for SeparationConfig {
    fn default() -> Self {
        SeparationConfig {
            min_activity_violation: 1e-6,
            min_cut_violation: 1e-4,
            max_coef_range: 1e7,
            min_coef: 1e-9,
        }
    }
}

impl Default for QuadraticConfig {
    fn default() -> Self {
        QuadraticConfig {
            max_eig_sweeps: 50,
            eig_tol: 1e-10,
        }
    }
}

impl EngineConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist or contains invalid TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency of the tolerances.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feastol <= 0.0 {
            return Err(ConfigError::Invalid("feastol must be positive".into()));
        }
        if self.epsilon <= 0.0 || self.epsilon > self.feastol {
            return Err(ConfigError::Invalid(
                "epsilon must be positive and no larger than feastol".into(),
            ));
        }
        if self.separation.max_coef_range < 1.0 {
            return Err(ConfigError::Invalid(
                "separation.max_coef_range must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
