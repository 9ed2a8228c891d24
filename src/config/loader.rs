//! Scenario loader.
//!
//! Pipeline:
//! 1. File size limit
//! 2. UTF-8 BOM strip
//! 3. YAML parsing (line-aware errors)
//! 4. Empty-document check
//! 5. Deserialization to typed config
//! 6. Validation
//! 7. Freeze with `Arc`

use std::path::Path;
use std::sync::Arc;

use serde_yaml::Value;
use tracing::debug;

use crate::config::schema::ScenarioConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Options for the scenario loader.
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// Limits for scenario size.
    pub config_limits: ConfigLimits,
}

/// Limits for scenario size to prevent resource exhaustion.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of contracts.
    pub max_contracts: usize,

    /// Maximum number of condition nodes per contract.
    pub max_nodes: usize,

    /// Maximum number of initial units.
    pub max_units: usize,

    /// Maximum number of scripted steps.
    pub max_steps: usize,

    /// Maximum scenario file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_contracts: env_or("GOALTRACK_MAX_CONTRACTS", 100),
            max_nodes: env_or("GOALTRACK_MAX_NODES", 1000),
            max_units: env_or("GOALTRACK_MAX_UNITS", 1000),
            max_steps: env_or("GOALTRACK_MAX_STEPS", 10_000),
            max_config_size: env_or("GOALTRACK_MAX_CONFIG_SIZE", 10 * 1024 * 1024),
        }
    }
}

/// Result of loading a scenario file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated scenario.
    pub config: Arc<ScenarioConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// Warning during scenario loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Scenario loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: LoaderOptions,
}

impl ConfigLoader {
    /// Creates a loader with the given options.
    #[must_use]
    pub const fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    /// Creates a loader with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LoaderOptions::default())
    }

    /// Loads a scenario file and returns the frozen configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or exceeds the size limit
    /// - YAML parsing or deserialization fails
    /// - Validation finds errors
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        let limit = self.options.config_limits.max_config_size;
        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > limit {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {limit} bytes"),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path)
    }

    /// Runs the pipeline on in-memory text. `origin` only labels errors.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`], minus file access.
    pub fn load_str(&self, raw: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
        let limit = self.options.config_limits.max_config_size;
        if raw.len() > limit {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{} bytes", raw.len()),
                expected: format!("at most {limit} bytes"),
            });
        }
        let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let root: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::ParseError {
            path: origin.to_path_buf(),
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })?;
        if root.is_null() {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: "Scenario file is empty".to_string(),
            });
        }

        let config: ScenarioConfig =
            serde_yaml::from_value(root).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: format!("Failed to deserialize scenario: {e}"),
            })?;

        let result = Validator::new().validate(&config, &self.options.config_limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: result.errors,
            });
        }
        let warnings: Vec<ConfigWarning> = result
            .warnings
            .into_iter()
            .map(|issue| ConfigWarning {
                message: issue.message,
                location: Some(issue.path),
            })
            .collect();

        debug!(
            path = %origin.display(),
            contracts = config.contracts.len(),
            steps = config.steps.len(),
            warnings = warnings.len(),
            "scenario loaded"
        );
        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

/// Reads an environment override, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
