//! Condition states and completion confidence.
//!
//! Every node in a condition tree and every per-unit ledger record carries a
//! [`ParameterState`]. Per-unit records additionally carry a [`Confidence`]
//! grade describing how directly the unit earned a completion claim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Abstract simulation time (seconds of universal time).
pub type Timestamp = f64;

/// Tri-state outcome of a condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterState {
    /// Not yet satisfied (or not enough information to tell).
    #[default]
    Incomplete,
    /// Satisfied.
    Complete,
    /// Irrecoverably violated.
    Failed,
}

impl ParameterState {
    /// Returns the lowercase name used in logs and save documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for [`ParameterState::Complete`].
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Returns `true` for [`ParameterState::Failed`].
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for ParameterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incomplete" => Ok(Self::Incomplete),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown parameter state '{other}'")),
        }
    }
}

/// How sure the engine is that a specific unit earned its completion claim.
///
/// Ordered `Weak < Medium < Strong`, so `max` picks the stronger claim.
///
/// - `Strong`: this exact unit was evaluated and passed.
/// - `Medium`: the unit is the product of a merge where a strong contributor
///   is still attached.
/// - `Weak`: the unit descends from a qualifying unit through a split and the
///   strong part is no longer attached.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Inherited through a split away from the qualifying part.
    Weak,
    /// Merged with a still-attached qualifying part.
    Medium,
    /// Evaluated directly.
    #[default]
    Strong,
}

impl Confidence {
    /// Returns the lowercase name used in logs and save documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Medium => "medium",
            Self::Strong => "strong",
        }
    }

    /// Grade recorded for fragments of a qualifying unit: strong stays
    /// strong, anything else is only weakly attributable to the fragment.
    #[must_use]
    pub const fn fragment_grade(self) -> Self {
        match self {
            Self::Strong => Self::Strong,
            Self::Medium | Self::Weak => Self::Weak,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weak" => Ok(Self::Weak),
            "medium" => Ok(Self::Medium),
            "strong" => Ok(Self::Strong),
            other => Err(format!("unknown confidence '{other}'")),
        }
    }
}
