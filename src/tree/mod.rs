//! Condition tree arena.
//!
//! A contract's conditions form a tree of [`Node`]s stored in a flat
//! `Vec` and addressed by [`NodeId`]. Node 0 is always the root. Each node
//! carries its behaviour as a [`NodeKind`]; callers that need typed access
//! use the capability queries ([`ConditionTree::as_leaf`],
//! [`ConditionTree::as_group`], ...) instead of matching on the kind.
//!
//! Nodes never evaluate themselves. The engine walks the tree and writes
//! states back through [`ConditionTree::set_state`].

pub mod combinators;
pub mod leaf;

use std::fmt;

use crate::error::TreeError;
use crate::group::Coordinator;
use crate::state::ParameterState;

pub use combinators::{CombineOp, SequenceNode, SequenceWalk, combine};
pub use leaf::{LeafEvaluation, UnitCondition, UnitLeaf, UnitRequirement};

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Behaviour of a node.
#[derive(Debug)]
pub enum NodeKind {
    /// Contract root; completes when every child completes.
    Root,
    /// Counting combinator.
    Combinator(CombineOp),
    /// Ordered combinator.
    Sequence(SequenceNode),
    /// Group with unit selection and dwell timer.
    Group(Coordinator),
    /// Condition over a unit.
    Leaf(UnitLeaf),
    /// Mirror of one filter step of the parent leaf.
    Filter {
        /// Step position in the parent's chain.
        step: usize,
    },
    /// State pushed by the host.
    Flag,
}

impl NodeKind {
    /// Short kind name for logs and save documents.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Combinator(op) => op.as_str(),
            Self::Sequence(_) => "sequence",
            Self::Group(_) => "group",
            Self::Leaf(_) => "unit",
            Self::Filter { .. } => "filter",
            Self::Flag => "flag",
        }
    }

    const fn accepts_children(&self) -> bool {
        !matches!(self, Self::Filter { .. } | Self::Flag)
    }

    const fn accepts_child_changed(&self) -> bool {
        matches!(self, Self::Root | Self::Group(_))
    }
}

/// One condition in the tree.
#[derive(Debug)]
pub struct Node {
    /// Unique key within the tree.
    pub key: String,
    /// Human title.
    pub title: Option<String>,
    /// Parent (none for the root).
    pub parent: Option<NodeId>,
    /// Children in declared order.
    pub children: Vec<NodeId>,
    /// Last computed state.
    pub state: ParameterState,
    /// Whether the presentation layer shows the node.
    pub visible: bool,
    /// Set when a descendant changed during the current event.
    pub child_changed: bool,
    /// Behaviour.
    pub kind: NodeKind,
}

/// Arena of condition nodes rooted at [`ConditionTree::root`].
#[derive(Debug)]
pub struct ConditionTree {
    nodes: Vec<Node>,
}

impl ConditionTree {
    /// Creates a tree holding only a root.
    #[must_use]
    pub fn new(root_key: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node {
                key: root_key.into(),
                title: None,
                parent: None,
                children: Vec::new(),
                state: ParameterState::Incomplete,
                visible: true,
                child_changed: false,
                kind: NodeKind::Root,
            }],
        }
    }

    /// The root node.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a tree has a root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a node under `parent`.
    ///
    /// Unit leaves with a filter chain get one [`NodeKind::Filter`] child per
    /// step, keyed `<key>.filter<N>`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError`] if `parent` is out of range or cannot have
    /// children, or if `key` is taken.
    pub fn add(
        &mut self,
        parent: NodeId,
        key: impl Into<String>,
        title: Option<String>,
        kind: NodeKind,
    ) -> Result<NodeId, TreeError> {
        let key = key.into();
        let parent_node = self.node(parent)?;
        if !parent_node.kind.accepts_children() {
            return Err(TreeError::LeafWithChildren(parent_node.key.clone()));
        }
        if self.nodes.iter().any(|n| n.key == key) {
            return Err(TreeError::DuplicateKey(key));
        }
        let steps = match &kind {
            NodeKind::Leaf(leaf) => leaf.step_count(),
            _ => 0,
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            key: key.clone(),
            title,
            parent: Some(parent),
            children: Vec::new(),
            state: ParameterState::Incomplete,
            visible: true,
            child_changed: false,
            kind,
        });
        self.nodes[parent.0].children.push(id);

        for step in 0..steps {
            let filter = self.add(id, format!("{key}.filter{step}"), None, NodeKind::Filter { step })?;
            if let Some(leaf) = self.as_leaf_mut(id) {
                leaf.push_filter_node(filter);
            }
        }
        Ok(id)
    }

    /// Checks combinator arity and sequence hidden positions.
    ///
    /// # Errors
    ///
    /// Returns the first [`TreeError::Arity`] found.
    pub fn validate(&self) -> Result<(), TreeError> {
        for node in &self.nodes {
            let count = node.children.len();
            let arity = |expected: &str| TreeError::Arity {
                key: node.key.clone(),
                expected: expected.to_string(),
                actual: count,
            };
            match &node.kind {
                NodeKind::Combinator(CombineOp::Not) if count != 1 => {
                    return Err(arity("exactly 1"));
                }
                NodeKind::Combinator(CombineOp::AtLeast(n)) if *n > count => {
                    return Err(arity(&format!("at least {n}")));
                }
                NodeKind::Group(_) if count == 0 => return Err(arity("at least 1")),
                NodeKind::Sequence(seq) => {
                    if let Some(bad) = seq.hidden.iter().find(|i| **i >= count) {
                        return Err(TreeError::IndexOutOfRange {
                            index: *bad,
                            len: count,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::IndexOutOfRange`] for a foreign id.
    pub fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(id.0).ok_or(TreeError::IndexOutOfRange {
            index: id.0,
            len: self.nodes.len(),
        })
    }

    /// Mutable node lookup.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::IndexOutOfRange`] for a foreign id.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        let len = self.nodes.len();
        self.nodes
            .get_mut(id.0)
            .ok_or(TreeError::IndexOutOfRange { index: id.0, len })
    }

    /// Finds a node by key.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::UnknownNode`] if no node has the key.
    pub fn find(&self, key: &str) -> Result<NodeId, TreeError> {
        self.nodes
            .iter()
            .position(|n| n.key == key)
            .map(NodeId)
            .ok_or_else(|| TreeError::UnknownNode(key.to_string()))
    }

    /// Key of a node (empty for a foreign id).
    #[must_use]
    pub fn node_key(&self, id: NodeId) -> String {
        self.nodes.get(id.0).map(|n| n.key.clone()).unwrap_or_default()
    }

    /// All nodes with their ids, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// State of a node (`Incomplete` for a foreign id).
    #[must_use]
    pub fn state(&self, id: NodeId) -> ParameterState {
        self.nodes.get(id.0).map_or(ParameterState::Incomplete, |n| n.state)
    }

    /// Writes a node state. Returns the previous state if it changed.
    pub fn set_state(&mut self, id: NodeId, state: ParameterState) -> Option<ParameterState> {
        let node = self.nodes.get_mut(id.0)?;
        if node.state == state {
            return None;
        }
        Some(std::mem::replace(&mut node.state, state))
    }

    /// States of a node's children in order.
    #[must_use]
    pub fn child_states(&self, id: NodeId) -> Vec<ParameterState> {
        self.nodes.get(id.0).map_or_else(Vec::new, |n| {
            n.children.iter().map(|c| self.state(*c)).collect()
        })
    }

    /// Children of a node (empty for a foreign id).
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(id.0) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    /// Node ids with every child before its parent.
    #[must_use]
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root(), false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                out.push(id);
                continue;
            }
            stack.push((id, true));
            for child in self.children(id).iter().rev() {
                stack.push((*child, false));
            }
        }
        out
    }

    /// Descendants of `id` in depth-first pre-order, excluding `id`.
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    /// Nearest group strictly above `id`.
    #[must_use]
    pub fn enclosing_group(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = self.nodes.get(id.0)?.parent;
        while let Some(current) = cursor {
            let node = &self.nodes[current.0];
            if matches!(node.kind, NodeKind::Group(_)) {
                return Some(current);
            }
            cursor = node.parent;
        }
        None
    }

    /// Flags the nearest ancestor of `from` that accepts child-change
    /// notifications (a group or the root). Returns the flagged node.
    pub fn notify_child_changed(&mut self, from: NodeId) -> Option<NodeId> {
        let mut cursor = self.nodes.get(from.0)?.parent;
        while let Some(current) = cursor {
            let node = &mut self.nodes[current.0];
            if node.kind.accepts_child_changed() {
                node.child_changed = true;
                return Some(current);
            }
            cursor = node.parent;
        }
        None
    }

    /// Nodes whose child-changed flag is set.
    #[must_use]
    pub fn pending_child_changes(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| n.child_changed)
            .map(|(id, _)| id)
            .collect()
    }

    /// Clears every child-changed flag.
    pub fn drain_child_changed(&mut self) {
        for node in &mut self.nodes {
            node.child_changed = false;
        }
    }

    // ------------------------------------------------------------------
    // Capability queries
    // ------------------------------------------------------------------

    /// Unit leaf at `id`.
    #[must_use]
    pub fn as_leaf(&self, id: NodeId) -> Option<&UnitLeaf> {
        match &self.nodes.get(id.0)?.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Mutable unit leaf at `id`.
    pub fn as_leaf_mut(&mut self, id: NodeId) -> Option<&mut UnitLeaf> {
        match &mut self.nodes.get_mut(id.0)?.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Sequence at `id`.
    #[must_use]
    pub fn as_sequence(&self, id: NodeId) -> Option<&SequenceNode> {
        match &self.nodes.get(id.0)?.kind {
            NodeKind::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    /// Mutable sequence at `id`.
    pub fn as_sequence_mut(&mut self, id: NodeId) -> Option<&mut SequenceNode> {
        match &mut self.nodes.get_mut(id.0)?.kind {
            NodeKind::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    /// Group coordinator at `id`.
    #[must_use]
    pub fn as_group(&self, id: NodeId) -> Option<&Coordinator> {
        match &self.nodes.get(id.0)?.kind {
            NodeKind::Group(group) => Some(group),
            _ => None,
        }
    }

    /// Mutable group coordinator at `id`.
    pub fn as_group_mut(&mut self, id: NodeId) -> Option<&mut Coordinator> {
        match &mut self.nodes.get_mut(id.0)?.kind {
            NodeKind::Group(group) => Some(group),
            _ => None,
        }
    }

    /// Filter step index mirrored by `id`.
    #[must_use]
    pub fn as_filter(&self, id: NodeId) -> Option<usize> {
        match self.nodes.get(id.0)?.kind {
            NodeKind::Filter { step } => Some(step),
            _ => None,
        }
    }

    /// Unit leaf by key.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError`] if the key is unknown or not a unit leaf.
    pub fn leaf(&self, key: &str) -> Result<&UnitLeaf, TreeError> {
        let id = self.find(key)?;
        self.as_leaf(id).ok_or_else(|| TreeError::Capability {
            key: key.to_string(),
            capability: "unit",
        })
    }

    /// Ids of every unit leaf.
    #[must_use]
    pub fn leaves(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Leaf(_)))
            .map(|(id, _)| id)
            .collect()
    }

    /// Ids of every group.
    #[must_use]
    pub fn groups(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Group(_)))
            .map(|(id, _)| id)
            .collect()
    }

    /// Sets a flag node's state. Returns the previous state if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError`] if the key is unknown or not a flag.
    pub fn set_flag(
        &mut self,
        key: &str,
        state: ParameterState,
    ) -> Result<Option<ParameterState>, TreeError> {
        let id = self.find(key)?;
        if !matches!(self.nodes[id.0].kind, NodeKind::Flag) {
            return Err(TreeError::Capability {
                key: key.to_string(),
                capability: "flag",
            });
        }
        Ok(self.set_state(id, state))
    }
}
