//! Bit-vector filter evaluator.
//!
//! A [`BitFilter`] evaluates one predicate over an ordered item collection
//! (a unit's crew or parts). It keeps two bit-vectors sized to the
//! collection: `source` holds the items still eligible when the step runs,
//! `result` holds the eligible items that pass the predicate. Steps are
//! chained through a [`FilterChain`]: a [`MatchPolicy::Filter`] step narrows
//! the eligible set for the steps after it, every other policy leaves it
//! alone.
//!
//! Buffers are reused between evaluations and only ever grow, doubling their
//! capacity and keeping existing bit positions.

pub mod predicate;

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::state::ParameterState;
use crate::unit::{Collection, Item};

pub use predicate::{ComparisonOp, ItemPredicate, ValueCheck, compare_op};

// ============================================================================
// Match Policy
// ============================================================================

/// How a step's passing items turn into a state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// At least one item passes; narrows the eligible set.
    #[default]
    Filter,
    /// At least one item passes; eligible set unchanged.
    Validate,
    /// Every eligible item passes.
    ValidateAll,
    /// No eligible item passes.
    None,
}

impl MatchPolicy {
    /// Returns `true` if the policy narrows the eligible set.
    #[must_use]
    pub const fn narrows(self) -> bool {
        matches!(self, Self::Filter)
    }

    /// Returns the snake-case name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Validate => "validate",
            Self::ValidateAll => "validate_all",
            Self::None => "none",
        }
    }

    /// Maps eligible and passing counts to a state.
    ///
    /// An empty eligible set cannot be judged, so it yields `Incomplete`,
    /// except for [`MatchPolicy::None`] which is vacuously satisfied.
    #[must_use]
    pub const fn state(self, eligible: usize, passing: usize) -> ParameterState {
        if eligible == 0 {
            return match self {
                Self::None => ParameterState::Complete,
                _ => ParameterState::Incomplete,
            };
        }
        let ok = match self {
            Self::Filter | Self::Validate => passing > 0,
            Self::ValidateAll => passing == eligible,
            Self::None => passing == 0,
        };
        if ok {
            ParameterState::Complete
        } else {
            ParameterState::Failed
        }
    }

    const fn phrase(self) -> &'static str {
        match self {
            Self::Filter | Self::Validate => "at least one",
            Self::ValidateAll => "all",
            Self::None => "none",
        }
    }
}

// ============================================================================
// Buffers
// ============================================================================

/// Reusable pair of bit-vectors owned by one evaluator.
#[derive(Debug, Clone, Default)]
pub struct FilterBuffers {
    source: BitVec,
    result: BitVec,
    len: usize,
}

impl FilterBuffers {
    /// Creates empty buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bits currently in use.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bits are in use.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated bit capacity of each vector.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.source.len()
    }

    /// Makes `len` bits usable, doubling capacity as needed.
    ///
    /// Bits below the previous capacity keep their values; new bits start
    /// cleared.
    pub fn grow_to(&mut self, len: usize) {
        let mut capacity = self.capacity().max(1);
        while capacity < len {
            capacity *= 2;
        }
        if capacity > self.capacity() {
            self.source.resize(capacity, false);
            self.result.resize(capacity, false);
        }
        self.len = len;
    }

    /// Prepares the buffers for one evaluation: `source` takes the eligible
    /// bits, `result` is cleared.
    pub fn reset(&mut self, eligible: &BitSlice) {
        self.grow_to(eligible.len());
        let len = self.len;
        self.source[..len].copy_from_bitslice(eligible);
        self.result[..len].fill(false);
    }

    /// Items eligible at the start of the step.
    #[must_use]
    pub fn source(&self) -> &BitSlice {
        &self.source[..self.len]
    }

    /// Items eligible and passing.
    #[must_use]
    pub fn result(&self) -> &BitSlice {
        &self.result[..self.len]
    }

    fn set_result(&mut self, index: usize, value: bool) {
        self.result.set(index, value);
    }
}

// ============================================================================
// Filter Step
// ============================================================================

/// What a step tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTest {
    /// Per-item predicate.
    Items(ItemPredicate),
    /// Number of eligible items inside `[min, max]`. The per-item predicate
    /// is a no-op.
    Count {
        /// Minimum count.
        min: usize,
        /// Maximum count (unbounded when absent).
        max: Option<usize>,
    },
}

/// One evaluator step with its own buffers.
#[derive(Debug, Clone)]
pub struct BitFilter {
    policy: MatchPolicy,
    test: FilterTest,
    trivial: bool,
    buffers: FilterBuffers,
}

impl BitFilter {
    /// Creates a step. Count steps and no-op predicates start trivial.
    #[must_use]
    pub fn new(policy: MatchPolicy, test: FilterTest) -> Self {
        let trivial = match &test {
            FilterTest::Count { .. } => true,
            FilterTest::Items(p) => p.is_noop(),
        };
        Self {
            policy,
            test,
            trivial,
            buffers: FilterBuffers::new(),
        }
    }

    /// Builder: overrides the trivial flag.
    #[must_use]
    pub const fn with_trivial(mut self, trivial: bool) -> Self {
        self.trivial = trivial;
        self
    }

    /// Match policy.
    #[must_use]
    pub const fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Returns `true` if the step is left out of explanation text.
    #[must_use]
    pub const fn is_trivial(&self) -> bool {
        self.trivial
    }

    /// Items passing the last evaluation.
    #[must_use]
    pub fn result(&self) -> &BitSlice {
        self.buffers.result()
    }

    /// Eligible set handed to the next step after the last evaluation.
    #[must_use]
    pub fn narrowed(&self) -> &BitSlice {
        if self.policy.narrows() {
            self.buffers.result()
        } else {
            self.buffers.source()
        }
    }

    /// Evaluates the step into its own buffers.
    ///
    /// # Panics
    ///
    /// Panics if `eligible` and `items` differ in length.
    pub fn evaluate(
        &mut self,
        eligible: &BitSlice,
        items: &[Item],
        catalog: &Catalog,
    ) -> ParameterState {
        run_step(
            self.policy,
            &self.test,
            eligible,
            items,
            catalog,
            &mut self.buffers,
        )
    }

    /// Same computation as [`BitFilter::evaluate`] into scratch buffers,
    /// leaving the step's own buffers untouched.
    #[must_use]
    pub fn check(
        &self,
        eligible: &BitSlice,
        items: &[Item],
        catalog: &Catalog,
        scratch: &mut FilterBuffers,
    ) -> ParameterState {
        run_step(self.policy, &self.test, eligible, items, catalog, scratch)
    }

    /// Explanation line, or `None` for trivial steps.
    #[must_use]
    pub fn describe(&self, collection: Collection) -> Option<String> {
        if self.trivial {
            return None;
        }
        Some(match &self.test {
            FilterTest::Items(predicate) => format!(
                "{}: {} {}",
                collection.label(),
                self.policy.phrase(),
                predicate.describe()
            ),
            FilterTest::Count { min, max: Some(max) } => {
                format!("{}: between {min} and {max}", collection.label())
            }
            FilterTest::Count { min, max: None } => {
                format!("{}: at least {min}", collection.label())
            }
        })
    }
}

fn run_step(
    policy: MatchPolicy,
    test: &FilterTest,
    eligible: &BitSlice,
    items: &[Item],
    catalog: &Catalog,
    buffers: &mut FilterBuffers,
) -> ParameterState {
    assert_eq!(
        eligible.len(),
        items.len(),
        "eligible set must match the collection"
    );
    buffers.reset(eligible);

    match test {
        FilterTest::Items(predicate) => {
            for (index, item) in items.iter().enumerate() {
                let pass = eligible[index] && predicate.matches(item, catalog);
                buffers.set_result(index, pass);
            }
            policy.state(eligible.count_ones(), buffers.result().count_ones())
        }
        FilterTest::Count { min, max } => {
            for index in eligible.iter_ones() {
                buffers.set_result(index, true);
            }
            count_state(eligible.count_ones(), *min, *max)
        }
    }
}

/// State of a count step for `count` eligible items.
#[must_use]
pub fn count_state(count: usize, min: usize, max: Option<usize>) -> ParameterState {
    let within = count >= min && max.is_none_or(|m| count <= m);
    if within {
        ParameterState::Complete
    } else if count == 0 {
        ParameterState::Incomplete
    } else {
        ParameterState::Failed
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Ordered steps over one collection.
#[derive(Debug, Clone)]
pub struct FilterChain {
    collection: Collection,
    steps: Vec<BitFilter>,
    eligible: BitVec,
}

impl FilterChain {
    /// Creates a chain over `collection`.
    #[must_use]
    pub fn new(collection: Collection, steps: Vec<BitFilter>) -> Self {
        Self {
            collection,
            steps,
            eligible: BitVec::new(),
        }
    }

    /// Collection the chain filters.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        self.collection
    }

    /// Steps in evaluation order.
    #[must_use]
    pub fn steps(&self) -> &[BitFilter] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the chain has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Evaluates every step, storing bits, and returns one state per step.
    pub fn evaluate(&mut self, items: &[Item], catalog: &Catalog) -> Vec<ParameterState> {
        self.eligible.clear();
        self.eligible.resize(items.len(), true);

        let mut states = Vec::with_capacity(self.steps.len());
        for step in &mut self.steps {
            states.push(step.evaluate(&self.eligible, items, catalog));
            if step.policy().narrows() {
                self.eligible.copy_from_bitslice(step.result());
            }
        }
        states
    }

    /// Evaluates every step without touching stored bits.
    #[must_use]
    pub fn check(&self, items: &[Item], catalog: &Catalog) -> Vec<ParameterState> {
        let mut eligible = bitvec![1; items.len()];
        let mut scratch = FilterBuffers::new();
        let mut states = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            states.push(step.check(&eligible, items, catalog, &mut scratch));
            if step.policy().narrows() {
                eligible.copy_from_bitslice(scratch.result());
            }
        }
        states
    }

    /// Explanation lines of the non-trivial steps.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.describe(self.collection))
            .collect()
    }
}

/// Folds step states: any failure fails, all complete completes.
#[must_use]
pub fn chain_state(states: &[ParameterState]) -> ParameterState {
    if states.iter().any(|s| s.is_failed()) {
        ParameterState::Failed
    } else if states.iter().all(|s| s.is_complete()) {
        ParameterState::Complete
    } else {
        ParameterState::Incomplete
    }
}
