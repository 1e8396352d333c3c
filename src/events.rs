//! Change notification and batching.
//!
//! Every invalidated node and every collection mutation is submitted to the
//! `EventBuffer`. While a batch is open the buffer only records what changed,
//! keeping one entry per node and merging collection deltas. When the
//! outermost batch closes, the graph drains the buffer and delivers each
//! record once, collections first and nodes in dependency order.

use crate::collection::CollectionDelta;
use crate::error::{StatError, StatResult};
use crate::modifier::ModifierId;
use crate::node::{Form, NodeKey, NodeType};
use crate::path::PathDefinition;
use crate::stat::Stat;
use crate::value_fn::CalculationContext;
use indexmap::{IndexMap, IndexSet};
use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle returned by the subscribe calls, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node's cached value was invalidated.
///
/// Pull the new value through the context handed to the callback (or later
/// through the calculator); it is computed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueChanged {
    pub key: NodeKey,
}

impl ValueChanged {
    pub fn stat(&self) -> Option<&Stat> {
        self.key.stat_ref()
    }

    pub fn node_type(&self) -> Option<NodeType> {
        match &self.key {
            NodeKey::Stat { node_type, .. } => Some(*node_type),
            NodeKey::Modifier(_) => None,
        }
    }
}

/// Modifiers were added to or removed from a stat's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionChanged {
    pub stat: Stat,
    pub form: Form,
    pub path: PathDefinition,
    pub added: Vec<ModifierId>,
    pub removed: Vec<ModifierId>,
}

/// Callback for node value changes.
pub type ValueCallback = Box<dyn FnMut(&ValueChanged, &mut dyn CalculationContext)>;

/// Callback for collection changes.
pub type CollectionCallback = Box<dyn FnMut(&CollectionChanged)>;

/// Identifies one collection of one stat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CollectionKey {
    pub stat: Stat,
    pub form: Form,
    pub path: PathDefinition,
}

/// Records drained from the buffer at the end of a batch.
#[derive(Debug, Default)]
pub(crate) struct PendingChanges {
    pub collections: Vec<(CollectionKey, CollectionDelta<ModifierId>)>,
    pub nodes: Vec<NodeIndex>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.nodes.is_empty()
    }
}

/// Reference-counted batch scope plus the deduplicated pending records.
#[derive(Debug, Default)]
pub(crate) struct EventBuffer {
    depth: usize,
    nodes: IndexSet<NodeIndex>,
    collections: IndexMap<CollectionKey, CollectionDelta<ModifierId>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a (possibly nested) batch.
    pub fn suspend(&mut self) {
        self.depth += 1;
    }

    /// Close a batch. Returns `true` when the outermost batch was closed and
    /// the buffer should be flushed.
    pub fn resume(&mut self) -> StatResult<bool> {
        if self.depth == 0 {
            return Err(StatError::UnbalancedBatch);
        }
        self.depth -= 1;
        Ok(self.depth == 0)
    }

    pub fn is_buffering(&self) -> bool {
        self.depth > 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn submit_node(&mut self, node: NodeIndex) {
        self.nodes.insert(node);
    }

    pub fn submit_collection(&mut self, key: CollectionKey, delta: CollectionDelta<ModifierId>) {
        match self.collections.get_mut(&key) {
            Some(pending) => pending.merge(delta),
            None => {
                self.collections.insert(key, delta);
            }
        }
    }

    /// Drop records of a node that no longer exists.
    pub fn forget_node(&mut self, node: NodeIndex) {
        self.nodes.shift_remove(&node);
    }

    pub fn has_pending(&self) -> bool {
        !self.nodes.is_empty() || !self.collections.is_empty()
    }

    /// Drain all records. Deltas that cancelled out are dropped.
    pub fn take(&mut self) -> PendingChanges {
        let collections = std::mem::take(&mut self.collections)
            .into_iter()
            .filter(|(_, delta)| !delta.is_empty())
            .collect();
        let nodes = std::mem::take(&mut self.nodes).into_iter().collect();
        PendingChanges { collections, nodes }
    }
}
