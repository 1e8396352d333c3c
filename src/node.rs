//! Calculation nodes.
//!
//! Every value in the graph lives in a `CalculationNode`: a cached
//! `Option<NodeValue>` plus the external subscribers that want to hear about
//! changes. Nodes are addressed by a `NodeKey`; a stat's pipeline nodes are
//! keyed by `(stat, node type, path)` and a modifier's value node by its id.

use crate::events::{SubscriptionId, ValueCallback};
use crate::modifier::ModifierId;
use crate::path::PathDefinition;
use crate::stat::Stat;
use crate::value::NodeValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One stage of a stat's aggregation pipeline, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    BaseSet,
    BaseAdd,
    Increase,
    More,
    /// `BaseSet` and `BaseAdd` of one path combined.
    Base,
    /// `Base × Increase × More` of one path.
    PathTotal,
    TotalOverride,
    /// Sum of all path totals before bounds are applied.
    UncappedSubtotal,
    Subtotal,
    Total,
}

impl NodeType {
    pub const ALL: [NodeType; 10] = [
        NodeType::BaseSet,
        NodeType::BaseAdd,
        NodeType::Increase,
        NodeType::More,
        NodeType::Base,
        NodeType::PathTotal,
        NodeType::TotalOverride,
        NodeType::UncappedSubtotal,
        NodeType::Subtotal,
        NodeType::Total,
    ];

    /// Stat-level node types exist once per stat, on the main path.
    pub fn is_stat_level(self) -> bool {
        matches!(
            self,
            NodeType::TotalOverride
                | NodeType::UncappedSubtotal
                | NodeType::Subtotal
                | NodeType::Total
        )
    }

    /// The form whose modifiers this node aggregates, if any.
    pub fn form(self) -> Option<Form> {
        match self {
            NodeType::BaseSet => Some(Form::BaseSet),
            NodeType::BaseAdd => Some(Form::BaseAdd),
            NodeType::Increase => Some(Form::Increase),
            NodeType::More => Some(Form::More),
            NodeType::TotalOverride => Some(Form::TotalOverride),
            _ => None,
        }
    }

    /// The node types that read this one when the pipeline is wired normally.
    pub(crate) fn chain_above(self) -> &'static [NodeType] {
        match self {
            NodeType::BaseSet | NodeType::BaseAdd => &[
                NodeType::Base,
                NodeType::PathTotal,
                NodeType::UncappedSubtotal,
                NodeType::Subtotal,
                NodeType::Total,
            ],
            NodeType::Increase | NodeType::More | NodeType::Base => &[
                NodeType::PathTotal,
                NodeType::UncappedSubtotal,
                NodeType::Subtotal,
                NodeType::Total,
            ],
            NodeType::PathTotal => &[
                NodeType::UncappedSubtotal,
                NodeType::Subtotal,
                NodeType::Total,
            ],
            NodeType::UncappedSubtotal => &[NodeType::Subtotal, NodeType::Total],
            NodeType::TotalOverride | NodeType::Subtotal => &[NodeType::Total],
            NodeType::Total => &[],
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a modifier contributes to a stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Form {
    BaseSet,
    BaseAdd,
    /// Percentage increase, summed.
    Increase,
    /// Percentage "more" multiplier, multiplied.
    More,
    TotalOverride,
}

impl Form {
    pub fn node_type(self) -> NodeType {
        match self {
            Form::BaseSet => NodeType::BaseSet,
            Form::BaseAdd => NodeType::BaseAdd,
            Form::Increase => NodeType::Increase,
            Form::More => NodeType::More,
            Form::TotalOverride => NodeType::TotalOverride,
        }
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Address of a node in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKey {
    Stat {
        stat: Stat,
        node_type: NodeType,
        path: PathDefinition,
    },
    Modifier(ModifierId),
}

impl NodeKey {
    /// Build a stat node key; stat-level node types are normalized to the
    /// main path.
    pub fn stat(stat: Stat, node_type: NodeType, path: PathDefinition) -> Self {
        let path = if node_type.is_stat_level() {
            PathDefinition::main()
        } else {
            path
        };
        NodeKey::Stat {
            stat,
            node_type,
            path,
        }
    }

    pub fn stat_ref(&self) -> Option<&Stat> {
        match self {
            NodeKey::Stat { stat, .. } => Some(stat),
            NodeKey::Modifier(_) => None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Stat {
                stat,
                node_type,
                path,
            } if path.is_main() => write!(f, "{}.{}", stat, node_type),
            NodeKey::Stat {
                stat,
                node_type,
                path,
            } => write!(f, "{}.{}[{}]", stat, node_type, path),
            NodeKey::Modifier(id) => write!(f, "Modifier#{}", id),
        }
    }
}

/// Cache state of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NodeState {
    /// Needs to be recomputed on the next read.
    Stale,
    /// Being computed; reading it again is a cycle.
    Computing,
    Ready(Option<NodeValue>),
}

/// A node in the calculation arena.
pub(crate) struct CalculationNode {
    pub key: NodeKey,
    pub state: NodeState,
    pub subscribers: Vec<(SubscriptionId, ValueCallback)>,
}

impl CalculationNode {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            state: NodeState::Stale,
            subscribers: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn cached(&self) -> Option<Option<NodeValue>> {
        match self.state {
            NodeState::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Mark the cache stale. Returns whether the node held a value.
    pub fn invalidate(&mut self) -> bool {
        let was_ready = matches!(self.state, NodeState::Ready(_));
        if self.state != NodeState::Computing {
            self.state = NodeState::Stale;
        }
        was_ready
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl fmt::Debug for CalculationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculationNode")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
