//! Composite node semantics.
//!
//! Counting combinators are pure functions of their children's states. A
//! sequence additionally remembers that it failed.

use serde::{Deserialize, Serialize};

use crate::state::ParameterState;

/// Counting combinator over child states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    /// Every child complete. Any failed child fails.
    All,
    /// At least one child complete.
    Any,
    /// No child complete.
    None,
    /// Single-child form of [`CombineOp::None`].
    Not,
    /// Fails once more than `n` children are complete.
    AtMost(usize),
    /// At least `n` children complete.
    AtLeast(usize),
}

impl CombineOp {
    /// Returns the lowercase name used in configuration and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
            Self::None => "none",
            Self::Not => "not",
            Self::AtMost(_) => "at_most",
            Self::AtLeast(_) => "at_least",
        }
    }
}

/// Folds child states through `op`.
#[must_use]
pub fn combine(op: CombineOp, children: &[ParameterState]) -> ParameterState {
    let complete = children.iter().filter(|s| s.is_complete()).count();
    let done = |ok: bool| {
        if ok {
            ParameterState::Complete
        } else {
            ParameterState::Incomplete
        }
    };
    match op {
        CombineOp::All => {
            if children.iter().any(|s| s.is_failed()) {
                ParameterState::Failed
            } else {
                done(complete == children.len())
            }
        }
        CombineOp::Any => done(complete > 0),
        CombineOp::None | CombineOp::Not => done(complete == 0),
        CombineOp::AtMost(n) => {
            if complete > n {
                ParameterState::Failed
            } else {
                ParameterState::Complete
            }
        }
        CombineOp::AtLeast(n) => done(complete >= n),
    }
}

// ============================================================================
// Sequence
// ============================================================================

/// Children must complete in declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceNode {
    /// Completing a later child while an earlier one is pending fails the
    /// sequence. When off, out-of-order completions are ignored.
    pub fail_on_out_of_order: bool,
    /// Child positions kept hidden until the sequence reaches them.
    pub hidden: Vec<usize>,
    failed: bool,
}

/// Outcome of one sequence walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceWalk {
    /// Sequence state.
    pub state: ParameterState,
    /// Position of the first child that is not complete.
    pub pending: Option<usize>,
}

impl SequenceNode {
    /// Creates a sequence.
    #[must_use]
    pub const fn new(fail_on_out_of_order: bool, hidden: Vec<usize>) -> Self {
        Self {
            fail_on_out_of_order,
            hidden,
            failed: false,
        }
    }

    /// Returns `true` once the sequence has failed.
    #[must_use]
    pub const fn has_failed(&self) -> bool {
        self.failed
    }

    /// Restores the failure latch.
    pub const fn restore_failed(&mut self, failed: bool) {
        self.failed = failed;
    }

    /// Walks the children and latches a failure.
    pub fn advance(&mut self, children: &[ParameterState]) -> SequenceWalk {
        let walk = self.walk(children);
        if walk.state.is_failed() {
            self.failed = true;
        }
        walk
    }

    /// Walks the children without latching.
    #[must_use]
    pub fn walk(&self, children: &[ParameterState]) -> SequenceWalk {
        let mut pending = None;
        let mut failed = self.failed;
        for (index, state) in children.iter().enumerate() {
            match state {
                ParameterState::Failed => failed = true,
                ParameterState::Complete => {
                    if pending.is_some() && self.fail_on_out_of_order {
                        failed = true;
                    }
                }
                ParameterState::Incomplete => {
                    if pending.is_none() {
                        pending = Some(index);
                    }
                }
            }
        }
        let state = if failed {
            ParameterState::Failed
        } else if pending.is_none() {
            ParameterState::Complete
        } else {
            ParameterState::Incomplete
        };
        SequenceWalk { state, pending }
    }

    /// Whether the child at `index` should be visible for a walk that
    /// stopped at `pending`.
    #[must_use]
    pub fn is_visible(&self, index: usize, pending: Option<usize>) -> bool {
        if !self.hidden.contains(&index) {
            return true;
        }
        pending.is_none_or(|p| index <= p)
    }
}
