use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_max_iterations() -> u32 {
    100
}
const fn default_translation_converge_threshold() -> f64 {
    1e-4
}
const fn default_rotation_converge_threshold() -> f64 {
    1e-4
}
const fn default_damping() -> f64 {
    1e-3
}
const fn default_true() -> bool {
    true
}
const fn default_max_damping() -> f64 {
    1e3
}
const fn default_probe_delta() -> f64 {
    1e-6
}
const fn default_factor() -> f64 {
    1.0
}
const fn default_error_clamp() -> f64 {
    0.25
}
const fn default_rest_pose_factor() -> f64 {
    0.1
}
const fn default_stall_threshold() -> f64 {
    1e-9
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Tuning parameters for the closed-chain solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum iterations per solve (default: 100).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Translation error (meters) below which a closure counts as satisfied.
    #[serde(default = "default_translation_converge_threshold")]
    pub translation_converge_threshold: f64,

    /// Angular error (radians) below which a closure counts as satisfied.
    #[serde(default = "default_rotation_converge_threshold")]
    pub rotation_converge_threshold: f64,

    /// Initial damping factor (lambda). Higher = more robust near
    /// singularities, but slower convergence.
    #[serde(default = "default_damping")]
    pub damping: f64,

    /// Raise damping after a step that increased the error, lower it after
    /// one that decreased it.
    #[serde(default = "default_true")]
    pub adaptive_damping: bool,

    /// Damping above which the solve gives up and reports divergence.
    #[serde(default = "default_max_damping")]
    pub max_damping: f64,

    /// Finite-difference step used to probe each DOF.
    #[serde(default = "default_probe_delta")]
    pub probe_delta: f64,

    /// Weight of translation error rows.
    #[serde(default = "default_factor")]
    pub translation_factor: f64,

    /// Weight of rotation error rows.
    #[serde(default = "default_factor")]
    pub rotation_factor: f64,

    /// Cap on the translation error norm fed into a single step.
    #[serde(default = "default_error_clamp")]
    pub translation_error_clamp: f64,

    /// Cap on the rotation error norm fed into a single step.
    #[serde(default = "default_error_clamp")]
    pub rotation_error_clamp: f64,

    /// Pull of under-constrained DOFs toward their target values.
    /// Zero disables the bias.
    #[serde(default = "default_rest_pose_factor")]
    pub rest_pose_factor: f64,

    /// Largest per-DOF step that still counts as making progress.
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            translation_converge_threshold: default_translation_converge_threshold(),
            rotation_converge_threshold: default_rotation_converge_threshold(),
            damping: default_damping(),
            adaptive_damping: true,
            max_damping: default_max_damping(),
            probe_delta: default_probe_delta(),
            translation_factor: default_factor(),
            rotation_factor: default_factor(),
            translation_error_clamp: default_error_clamp(),
            rotation_error_clamp: default_error_clamp(),
            rest_pose_factor: default_rest_pose_factor(),
            stall_threshold: default_stall_threshold(),
        }
    }
}

impl SolverConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            (
                "translation_converge_threshold",
                self.translation_converge_threshold,
            ),
            ("rotation_converge_threshold", self.rotation_converge_threshold),
            ("translation_error_clamp", self.translation_error_clamp),
            ("rotation_error_clamp", self.rotation_error_clamp),
        ];
        for (field, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(invalid(field, format!("{value} (must be > 0)")));
            }
        }

        let non_negative = [
            ("damping", self.damping),
            ("translation_factor", self.translation_factor),
            ("rotation_factor", self.rotation_factor),
            ("rest_pose_factor", self.rest_pose_factor),
            ("stall_threshold", self.stall_threshold),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("{value} (must be finite and >= 0)")));
            }
        }

        if self.probe_delta == 0.0 || !self.probe_delta.is_finite() {
            return Err(invalid("probe_delta", "must be finite and non-zero".into()));
        }
        if self.max_damping.is_nan() || self.max_damping < self.damping {
            return Err(invalid("max_damping", "must be >= damping".into()));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
