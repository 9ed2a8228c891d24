//! Compiles validated contract configuration into condition trees.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::schema::{
    ContractConfig, FilterConfig, GroupConfig, NodeConfig, ScenarioConfig, SequenceConfig,
    UnitLeafConfig,
};
use crate::engine::ContractEngine;
use crate::error::{ConfigError, TreeError};
use crate::filter::{BitFilter, FilterChain, FilterTest, ItemPredicate};
use crate::group::Coordinator;
use crate::ledger::LeafPolicy;
use crate::tracker::ContractTracker;
use crate::tree::{CombineOp, ConditionTree, NodeId, NodeKind, SequenceNode, UnitLeaf, UnitRequirement};

/// Builds a tracker holding every contract of the scenario, attached but not
/// yet evaluated.
///
/// # Errors
///
/// Returns [`ConfigError`] if a contract cannot be compiled.
pub fn build_tracker(config: &ScenarioConfig) -> Result<ContractTracker, ConfigError> {
    let catalog = Arc::new(config.catalog.clone());
    let mut tracker = ContractTracker::new(Arc::clone(&catalog));
    for contract in &config.contracts {
        let engine = build_contract(contract, Arc::clone(&catalog))?;
        tracker.insert(engine).map_err(|source| ConfigError::Tree {
            contract: contract.id.clone(),
            source,
        })?;
    }
    Ok(tracker)
}

/// Compiles one contract.
///
/// # Errors
///
/// Returns [`ConfigError::Tree`] for structural problems and
/// [`ConfigError::InvalidValue`] for an unusable group duration.
pub fn build_contract(
    config: &ContractConfig,
    catalog: Arc<Catalog>,
) -> Result<ContractEngine, ConfigError> {
    let mut tree = ConditionTree::new(config.id.clone());
    let root = tree.root();
    for node in &config.root {
        add_node(&mut tree, root, node, &config.id)?;
    }
    tree.validate().map_err(|source| ConfigError::Tree {
        contract: config.id.clone(),
        source,
    })?;
    Ok(ContractEngine::new(
        config.id.clone(),
        config.title.clone(),
        tree,
        catalog,
    ))
}

fn add_node(
    tree: &mut ConditionTree,
    parent: NodeId,
    node: &NodeConfig,
    contract: &str,
) -> Result<NodeId, ConfigError> {
    let tree_error = |source: TreeError| ConfigError::Tree {
        contract: contract.to_string(),
        source,
    };
    let kind = match node {
        NodeConfig::All(_) => NodeKind::Combinator(CombineOp::All),
        NodeConfig::Any(_) => NodeKind::Combinator(CombineOp::Any),
        NodeConfig::None(_) => NodeKind::Combinator(CombineOp::None),
        NodeConfig::Not(_) => NodeKind::Combinator(CombineOp::Not),
        NodeConfig::AtMost(c) => NodeKind::Combinator(CombineOp::AtMost(c.n)),
        NodeConfig::AtLeast(c) => NodeKind::Combinator(CombineOp::AtLeast(c.n)),
        NodeConfig::Sequence(seq) => NodeKind::Sequence(sequence(seq).map_err(tree_error)?),
        NodeConfig::Group(group) => NodeKind::Group(coordinator(group)?),
        NodeConfig::Unit(leaf) => NodeKind::Leaf(unit_leaf(leaf)),
        NodeConfig::Flag(_) => NodeKind::Flag,
    };
    let id = tree
        .add(parent, node.key(), node.title().map(str::to_string), kind)
        .map_err(tree_error)?;
    for child in node.children() {
        add_node(tree, id, child, contract)?;
    }
    Ok(id)
}

fn sequence(config: &SequenceConfig) -> Result<SequenceNode, TreeError> {
    let hidden = config
        .hidden
        .iter()
        .map(|key| {
            config
                .children
                .iter()
                .position(|c| c.key() == key)
                .ok_or_else(|| TreeError::UnknownNode(key.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SequenceNode::new(config.strict, hidden))
}

fn coordinator(config: &GroupConfig) -> Result<Coordinator, ConfigError> {
    let duration = config
        .duration
        .seconds()
        .map_err(|e| ConfigError::InvalidValue {
            field: format!("{}.duration", config.key),
            value: format!("{:?}", config.duration),
            expected: format!("a non-negative duration ({e})"),
        })?;
    let mut group = Coordinator::new(duration)
        .with_allowed(config.units.clone())
        .with_exclusive(config.exclusive);
    if let Some(name) = &config.define {
        group = group.with_define(name.clone());
    }
    Ok(group)
}

fn unit_leaf(config: &UnitLeafConfig) -> UnitLeaf {
    let requirement = UnitRequirement {
        kinds: config.kinds.clone(),
        values: config.values.clone(),
    };
    let policy = LeafPolicy {
        disable_on_state_change: config.disable_on_state_change,
        fail_when_unmet: config.fail_when_unmet,
    };
    let leaf = UnitLeaf::new(requirement, policy);
    match config.collection {
        Some(collection) if !config.filters.is_empty() => {
            let steps = config.filters.iter().map(filter_step).collect();
            leaf.with_chain(FilterChain::new(collection, steps))
        }
        _ => leaf,
    }
}

fn filter_step(config: &FilterConfig) -> BitFilter {
    let test = match config.count {
        Some(bounds) => FilterTest::Count {
            min: bounds.min,
            max: bounds.max,
        },
        None => FilterTest::Items(ItemPredicate {
            name: config.name.clone(),
            tag: config.tag.clone(),
            value: config.value.clone(),
        }),
    };
    let step = BitFilter::new(config.policy, test);
    match config.trivial {
        Some(trivial) => step.with_trivial(trivial),
        None => step,
    }
}
