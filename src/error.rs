//! Error types for `goaltrack`
//!
//! Condition failures are ordinary [`ParameterState::Failed`] values, not
//! errors. The types here cover tree-construction misuse, configuration and
//! save-document problems, and scripted scenario mistakes.
//!
//! [`ParameterState::Failed`]: crate::state::ParameterState::Failed

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `goaltrack` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Engine error (tree construction misuse, unusable save document)
    pub const ENGINE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `goaltrack` operations.
#[derive(Debug, Error)]
pub enum GoalTrackError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Condition tree construction or lookup error
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Save document error
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Scripted scenario error
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    /// Usage error
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl GoalTrackError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Tree(_) | Self::Persistence(_) => ExitCode::ENGINE_ERROR,
            Self::Scenario(_) => ExitCode::ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Tree Errors
// ============================================================================

/// Condition tree construction and lookup errors.
///
/// These indicate a bug in whoever built the tree and are never produced by
/// host event handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// No node carries the given key
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// Node index outside the arena
    #[error("node index {index} out of range (tree has {len} nodes)")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of nodes in the tree
        len: usize,
    },

    /// Two nodes share a key
    #[error("duplicate node key '{0}'")]
    DuplicateKey(String),

    /// Combinator has the wrong number of children
    #[error("node '{key}' expects {expected} children, got {actual}")]
    Arity {
        /// Node key
        key: String,
        /// Human description of the accepted count
        expected: String,
        /// Actual child count
        actual: usize,
    },

    /// Node does not support the requested operation
    #[error("node '{key}' is not a {capability} node")]
    Capability {
        /// Node key
        key: String,
        /// Expected capability
        capability: &'static str,
    },

    /// Children were attached to a leaf
    #[error("node '{0}' is a leaf and cannot have children")]
    LeafWithChildren(String),
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Compiled condition tree was rejected
    #[error("contract '{contract}': {source}")]
    Tree {
        /// Contract id
        contract: String,
        /// Underlying tree error
        #[source]
        source: TreeError,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "contracts[0].root[1].group")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - validation failure that prevents configuration from being used
    Error,
    /// Warning - potential issue that does not prevent configuration loading
    Warning,
}

// ============================================================================
// Persistence Errors
// ============================================================================

/// Save-document errors severe enough to abandon the load.
///
/// Per-record anomalies are reported as
/// [`LoadWarning`](crate::persistence::LoadWarning)s instead.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Document root has an unexpected name
    #[error("expected '{expected}' node, found '{found}'")]
    UnexpectedNode {
        /// Expected node name
        expected: &'static str,
        /// Actual node name
        found: String,
    },

    /// A required value is absent
    #[error("missing value '{key}' in '{node}'")]
    MissingValue {
        /// Node name
        node: String,
        /// Value key
        key: &'static str,
    },

    /// Document could not be encoded or decoded
    #[error("save document encoding: {0}")]
    Encoding(#[from] serde_yaml::Error),

    /// Document could not be read or written
    #[error("save document I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Scenario Errors
// ============================================================================

/// Errors raised while replaying a scripted scenario.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScenarioError {
    /// Step references a unit name the world does not know
    #[error("step {step}: unknown unit '{name}'")]
    UnknownUnit {
        /// Step index
        step: usize,
        /// Unit name
        name: String,
    },

    /// Step references a unit that already exists
    #[error("step {step}: unit '{name}' already exists")]
    DuplicateUnit {
        /// Step index
        step: usize,
        /// Unit name
        name: String,
    },

    /// Step references a fragment or member index the unit does not have
    #[error("step {step}: unit '{name}' has no {what} at index {index}")]
    BadIndex {
        /// Step index
        step: usize,
        /// Unit name
        name: String,
        /// What was indexed ("fragment", "crew member")
        what: &'static str,
        /// Offending index
        index: usize,
    },

    /// Step cannot be applied in the current world
    #[error("step {step}: {message}")]
    Invalid {
        /// Step index
        step: usize,
        /// Description
        message: String,
    },
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `goaltrack` operations.
pub type Result<T> = std::result::Result<T, GoalTrackError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::SUCCESS, 0);
        assert_eq!(ExitCode::ERROR, 1);
        assert_eq!(ExitCode::CONFIG_ERROR, 2);
        assert_eq!(ExitCode::IO_ERROR, 3);
        assert_eq!(ExitCode::ENGINE_ERROR, 5);
        assert_eq!(ExitCode::USAGE_ERROR, 64);
    }

    #[test]
    fn test_tree_error_exit_code() {
        let err: GoalTrackError = TreeError::UnknownNode("x".to_string()).into();
        assert_eq!(err.exit_code(), ExitCode::ENGINE_ERROR);
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: GoalTrackError = ConfigError::MissingFile {
            path: PathBuf::from("/test"),
        }
        .into();
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: GoalTrackError = io_err.into();
        assert_eq!(err.exit_code(), ExitCode::IO_ERROR);
    }

    #[test]
    fn test_usage_error_exit_code() {
        let err = GoalTrackError::Usage("bad".to_string());
        assert_eq!(err.exit_code(), ExitCode::USAGE_ERROR);
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue {
            path: "contracts[0]".to_string(),
            message: "empty root".to_string(),
            severity: Severity::Warning,
        };
        assert_eq!(issue.to_string(), "warning: empty root at contracts[0]");
    }

    #[test]
    fn test_tree_error_messages() {
        let err = TreeError::Arity {
            key: "n".to_string(),
            expected: "exactly 1".to_string(),
            actual: 3,
        };
        assert_eq!(err.to_string(), "node 'n' expects exactly 1 children, got 3");
    }
}
