//! Item predicates used by filter steps.

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::unit::Item;

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    #[default]
    Ge, // >=
    Le, // <=
    Eq, // ==
    Gt, // >
    Lt, // <
}

impl ComparisonOp {
    /// Symbol used in explanation text.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }
}

/// Applies `op` to `current` and `target`.
#[must_use]
pub fn compare_op(current: f64, target: f64, op: ComparisonOp) -> bool {
    match op {
        ComparisonOp::Ge => current >= target,
        ComparisonOp::Le => current <= target,
        ComparisonOp::Eq => (current - target).abs() < f64::EPSILON,
        ComparisonOp::Gt => current > target,
        ComparisonOp::Lt => current < target,
    }
}

/// Numeric test against one named value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCheck {
    /// Value key (`experience`, `occupants`, ...).
    pub key: String,
    /// Comparison operator.
    #[serde(default)]
    pub op: ComparisonOp,
    /// Right-hand side.
    pub target: f64,
}

impl ValueCheck {
    /// Checks a value map entry. A missing value never passes.
    #[must_use]
    pub fn check(&self, value: Option<f64>) -> bool {
        value.is_some_and(|v| compare_op(v, self.target, self.op))
    }
}

/// Conjunction of optional item tests. An empty predicate accepts every item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemPredicate {
    /// Exact item name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Required tag, resolved through the catalog's alias table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Numeric requirement on the item's values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueCheck>,
}

impl ItemPredicate {
    /// Returns `true` if the predicate has no tests.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.name.is_none() && self.tag.is_none() && self.value.is_none()
    }

    /// Tests a single item.
    #[must_use]
    pub fn matches(&self, item: &Item, catalog: &Catalog) -> bool {
        if let Some(name) = &self.name
            && item.name != *name
        {
            return false;
        }
        if let Some(tag) = &self.tag {
            let wanted = catalog.canonical_tag(tag);
            if !item.tags.iter().any(|t| catalog.canonical_tag(t) == wanted) {
                return false;
            }
        }
        if let Some(check) = &self.value
            && !check.check(item.values.get(&check.key).copied())
        {
            return false;
        }
        true
    }

    /// Short human description (`tag pilot, experience >= 3`).
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(format!("named {name}"));
        }
        if let Some(tag) = &self.tag {
            parts.push(format!("tag {tag}"));
        }
        if let Some(check) = &self.value {
            parts.push(format!("{} {} {}", check.key, check.op.symbol(), check.target));
        }
        if parts.is_empty() {
            "any".to_string()
        } else {
            parts.join(", ")
        }
    }
}
