//! Calculation graph module.
//!
//! `CalculationGraph` holds every node in one petgraph arena. An edge
//! `a -> b` means "b read a the last time it was computed". Edges are not
//! declared up front: each node records what it reads while computing and is
//! rewired afterwards, so the graph always reflects the dependencies of the
//! cached values.
//!
//! - **Reads** are lazy. A stale node computes on access and caches the result.
//! - **Invalidation** walks outgoing edges, marks everything reachable stale
//!   and submits one change record per node to the event buffer.
//! - **Stale nodes keep their edges** until they recompute, so a later
//!   invalidation still reaches everything that consumed them.

use crate::behavior::{Behavior, BehaviorRegistry};
use crate::conversion::{effective_conversion, retained_fraction, ConversionRegistry};
use crate::error::{StatError, StatResult};
use crate::events::{
    CollectionCallback, CollectionChanged, CollectionKey, EventBuffer, SubscriptionId,
    ValueCallback, ValueChanged,
};
use crate::modifier::{Modifier, ModifierId};
use crate::node::{CalculationNode, Form, NodeKey, NodeState, NodeType};
use crate::path::PathDefinition;
use crate::stat::{DataType, Stat};
use crate::stat_graph::StatGraph;
use crate::value::{product_present, sum_present, NodeValue};
use crate::value_fn::{condition_holds, CalculationContext};
use indexmap::{IndexMap, IndexSet};
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Stat-level node types always live on the main path.
pub(crate) fn normalized(node_type: NodeType, path: &PathDefinition) -> PathDefinition {
    if node_type.is_stat_level() {
        PathDefinition::main()
    } else {
        path.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SubscriptionTarget {
    Node(NodeIndex),
    Collection(CollectionKey),
}

pub(crate) struct CalculationGraph {
    pub(crate) arena: StableDiGraph<CalculationNode, ()>,
    pub(crate) stats: IndexMap<Stat, StatGraph>,
    modifier_nodes: HashMap<ModifierId, NodeIndex>,
    modifiers: HashMap<ModifierId, Modifier>,
    pub(crate) behaviors: BehaviorRegistry,
    conversions: ConversionRegistry,
    pub(crate) events: EventBuffer,
    /// Nodes currently computing, outermost first.
    evaluation_stack: Vec<NodeIndex>,
    /// Computing nodes whose inputs changed underneath them.
    invalidated_while_computing: HashSet<NodeIndex>,
    subscriptions: HashMap<SubscriptionId, SubscriptionTarget>,
    next_subscription: u64,
    /// Stats whose `Total` is retained regardless of subscribers.
    pub(crate) registered: IndexSet<Stat>,
}

impl CalculationGraph {
    pub fn new() -> Self {
        Self {
            arena: StableDiGraph::new(),
            stats: IndexMap::new(),
            modifier_nodes: HashMap::new(),
            modifiers: HashMap::new(),
            behaviors: BehaviorRegistry::new(),
            conversions: ConversionRegistry::new(),
            events: EventBuffer::new(),
            evaluation_stack: Vec::new(),
            invalidated_while_computing: HashSet::new(),
            subscriptions: HashMap::new(),
            next_subscription: 0,
            registered: IndexSet::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Lookup and construction
    // ---------------------------------------------------------------------

    pub fn node_index(
        &self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> Option<NodeIndex> {
        self.stats
            .get(stat)?
            .node(node_type, &normalized(node_type, path))
    }

    pub fn modifier(&self, id: ModifierId) -> Option<&Modifier> {
        self.modifiers.get(&id)
    }

    pub fn modifier_count(&self) -> usize {
        self.modifiers.len()
    }

    /// Every path of `stat` that contributes to its `UncappedSubtotal`.
    pub fn paths_of(&self, stat: &Stat) -> Vec<PathDefinition> {
        let mut paths = self
            .stats
            .get(stat)
            .map(StatGraph::own_paths)
            .unwrap_or_else(|| vec![PathDefinition::main()]);
        for source in self.conversions.sources_into(stat) {
            let path = PathDefinition::converted_from(source);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    fn ensure_stat_graph(&mut self, stat: &Stat) {
        if self.stats.contains_key(stat) {
            return;
        }
        trace!(stat = %stat, "creating stat graph");
        self.stats.insert(stat.clone(), StatGraph::new(stat.clone()));
        let behaviors = self.behaviors.register(stat);
        if !behaviors.is_empty() {
            debug!(stat = %stat, count = behaviors.len(), "registered behaviors");
            self.invalidate_behavior_targets(&behaviors);
        }
    }

    /// Return the node `(stat, node_type, path)`, creating it and the chain
    /// of nodes above it if needed.
    pub fn get_or_create_node(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> StatResult<NodeIndex> {
        if !stat.is_resolved() {
            return Err(StatError::UnresolvedReference(stat.clone()));
        }
        let path = normalized(node_type, path);
        self.ensure_stat_graph(stat);
        if let Some(index) = self.node_index(stat, node_type, &path) {
            return Ok(index);
        }
        let index = self.create_node(stat, node_type, &path);
        for &above in node_type.chain_above() {
            let above_path = normalized(above, &path);
            if self.node_index(stat, above, &above_path).is_none() {
                self.create_node(stat, above, &above_path);
            }
        }
        Ok(index)
    }

    fn create_node(&mut self, stat: &Stat, node_type: NodeType, path: &PathDefinition) -> NodeIndex {
        let key = NodeKey::stat(stat.clone(), node_type, path.clone());
        trace!(node = %key, "creating node");
        let index = self.arena.add_node(CalculationNode::new(key));
        if let Some(graph) = self.stats.get_mut(stat) {
            graph.insert_node(node_type, path.clone(), index);
        }
        index
    }

    /// Remove a node from the arena. Its consumers are marked stale without
    /// producing change records.
    pub(crate) fn remove_node(&mut self, index: NodeIndex) {
        let consumers: Vec<NodeIndex> = self
            .arena
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        for consumer in consumers {
            self.propagate_stale(consumer, false);
        }
        self.events.forget_node(index);
        if let Some(node) = self.arena.remove_node(index) {
            for (id, _) in &node.subscribers {
                self.subscriptions.remove(id);
            }
            if let NodeKey::Stat {
                stat,
                node_type,
                path,
            } = &node.key
            {
                if let Some(graph) = self.stats.get_mut(stat) {
                    graph.remove_node(*node_type, path);
                }
            }
            trace!(node = %node.key, "removed node");
        }
    }

    /// Drop a stat graph that no longer holds nodes or collections.
    pub(crate) fn remove_stat_graph(&mut self, stat: &Stat) {
        if self.stats.shift_remove(stat).is_none() {
            return;
        }
        trace!(stat = %stat, "removed stat graph");
        let behaviors = self.behaviors.unregister(stat);
        if !behaviors.is_empty() {
            debug!(stat = %stat, count = behaviors.len(), "unregistered behaviors");
            self.invalidate_behavior_targets(&behaviors);
        }
    }

    /// Reset a modifier's value node: drop its cache and the edges it read.
    pub(crate) fn reset_modifier_node(&mut self, index: NodeIndex) {
        let incoming: Vec<_> = self
            .arena
            .edges_directed(index, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        for edge in incoming {
            self.arena.remove_edge(edge);
        }
        if let Some(node) = self.arena.node_weight_mut(index) {
            node.invalidate();
        }
    }

    // ---------------------------------------------------------------------
    // Invalidation
    // ---------------------------------------------------------------------

    /// Mark `start` and everything downstream stale, recording each node as
    /// changed.
    pub fn invalidate(&mut self, start: NodeIndex) {
        self.propagate_stale(start, true);
    }

    fn invalidate_existing(&mut self, stat: &Stat, node_type: NodeType, path: &PathDefinition) {
        if let Some(index) = self.node_index(stat, node_type, path) {
            self.invalidate(index);
        }
    }

    pub(crate) fn propagate_stale(&mut self, start: NodeIndex, notify: bool) {
        if !self.evaluation_stack.is_empty() {
            // Values read earlier in this evaluation may be outdated now.
            self.invalidated_while_computing
                .extend(self.evaluation_stack.iter().copied());
        }
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            if !visited.insert(index) {
                continue;
            }
            let Some(node) = self.arena.node_weight_mut(index) else {
                continue;
            };
            node.invalidate();
            if notify {
                trace!(node = %node.key, "invalidated");
                self.events.submit_node(index);
            }
            stack.extend(self.arena.neighbors_directed(index, Direction::Outgoing));
        }
    }

    fn invalidate_behavior_targets(&mut self, behaviors: &[Behavior]) {
        let mut targets = Vec::new();
        for behavior in behaviors {
            for stat in behavior.affected_stats() {
                let Some(graph) = self.stats.get(stat) else {
                    continue;
                };
                for ((node_type, path), index) in graph.nodes() {
                    if behavior.applies_to(stat, *node_type, path) {
                        targets.push(*index);
                    }
                }
            }
        }
        for index in targets {
            self.invalidate(index);
        }
    }

    /// Invalidate everything that depends on which targets `source` feeds.
    fn conversion_changed(&mut self, source: &Stat, target: &Stat) {
        let mut targets = self.conversions.targets(source);
        if !targets.contains(target) {
            targets.push(target.clone());
        }
        let main = PathDefinition::main();
        self.invalidate_existing(source, NodeType::PathTotal, &main);
        let converted = PathDefinition::converted_from(source.clone());
        for target in targets {
            self.invalidate_existing(&target, NodeType::UncappedSubtotal, &main);
            self.invalidate_existing(&target, NodeType::Base, &converted);
        }
    }

    // ---------------------------------------------------------------------
    // Evaluation
    // ---------------------------------------------------------------------

    /// The value of a node, computing it if stale.
    pub fn evaluate(&mut self, index: NodeIndex) -> StatResult<Option<NodeValue>> {
        let key = match self.arena.node_weight(index) {
            None => return Ok(None),
            Some(node) => match node.state {
                NodeState::Ready(value) => return Ok(value),
                NodeState::Computing => return Err(self.cycle_error(index)),
                NodeState::Stale => node.key.clone(),
            },
        };

        self.set_state(index, NodeState::Computing);
        self.evaluation_stack.push(index);
        let mut evaluation = Evaluation::new(self);
        let result = evaluation.compute(&key);
        let reads = evaluation.into_reads();
        self.evaluation_stack.pop();
        let outdated = self.invalidated_while_computing.remove(&index);

        match result {
            Ok(value) => {
                self.rewire(index, &reads);
                if outdated {
                    self.set_state(index, NodeState::Stale);
                } else {
                    self.set_state(index, NodeState::Ready(value));
                }
                trace!(node = %key, value = ?value, "computed");
                Ok(value)
            }
            Err(err) => {
                self.rewire(index, &reads);
                self.set_state(index, NodeState::Stale);
                Err(err)
            }
        }
    }

    fn set_state(&mut self, index: NodeIndex, state: NodeState) {
        if let Some(node) = self.arena.node_weight_mut(index) {
            node.state = state;
        }
    }

    fn cycle_error(&self, index: NodeIndex) -> StatError {
        let start = self
            .evaluation_stack
            .iter()
            .position(|i| *i == index)
            .unwrap_or(0);
        let mut path: Vec<NodeKey> = self.evaluation_stack[start..]
            .iter()
            .filter_map(|i| self.arena.node_weight(*i))
            .map(|node| node.key.clone())
            .collect();
        if let Some(node) = self.arena.node_weight(index) {
            path.push(node.key.clone());
        }
        StatError::Cycle { path }
    }

    /// Replace the incoming edges of `index` with edges from what it read.
    fn rewire(&mut self, index: NodeIndex, reads: &IndexSet<NodeIndex>) {
        let incoming: Vec<_> = self
            .arena
            .edges_directed(index, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        for edge in incoming {
            self.arena.remove_edge(edge);
        }
        for &dependency in reads {
            if self.arena.contains_node(dependency) {
                self.arena.add_edge(dependency, index, ());
            }
        }
    }

    /// Value of a stat node, creating it if needed.
    pub fn value(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> StatResult<Option<NodeValue>> {
        let index = self.get_or_create_node(stat, node_type, path)?;
        self.evaluate(index)
    }

    pub fn modifier_value(&mut self, id: ModifierId) -> StatResult<Option<NodeValue>> {
        match self.modifier_nodes.get(&id).copied() {
            Some(index) => self.evaluate(index),
            None => Ok(None),
        }
    }

    // ---------------------------------------------------------------------
    // Modifiers
    // ---------------------------------------------------------------------

    /// Add a modifier to the collections of its stats.
    ///
    /// Returns `false` if a modifier with the same id is already present.
    pub fn add_modifier(&mut self, modifier: &Modifier) -> StatResult<bool> {
        let id = modifier.id();
        if self.modifiers.contains_key(&id) {
            return Ok(false);
        }
        if let Some(stat) = modifier.stats().iter().find(|stat| !stat.is_resolved()) {
            return Err(StatError::UnresolvedReference(stat.clone()));
        }

        debug!(modifier = %id, description = %modifier.description(), "adding modifier");
        let node = self
            .arena
            .add_node(CalculationNode::new(NodeKey::Modifier(id)));
        self.modifier_nodes.insert(id, node);
        self.modifiers.insert(id, modifier.clone());

        let form = modifier.form();
        let path = normalized(form.node_type(), &modifier.source().path());
        let main = PathDefinition::main();
        for stat in modifier.stats() {
            let form_node = self.get_or_create_node(stat, form.node_type(), &path)?;
            let Some(graph) = self.stats.get_mut(stat) else {
                continue;
            };
            let path_was_empty = !graph.path_has_members(&path);
            let Some(delta) = graph.collection_or_default(form, &path).add(id) else {
                continue;
            };
            let count = graph.increment_modifiers();
            let owner = graph.stat().clone();

            self.events.submit_collection(
                CollectionKey {
                    stat: stat.clone(),
                    form,
                    path: path.clone(),
                },
                delta,
            );
            self.invalidate(form_node);
            if !path.is_main() && path_was_empty {
                self.invalidate_existing(stat, NodeType::UncappedSubtotal, &main);
            }
            if count == 1 {
                if let Some((source, target)) = self.conversions.register(&owner) {
                    debug!(source = %source, target = %target, "linked conversion");
                    self.conversion_changed(&source, &target);
                }
            }
        }
        Ok(true)
    }

    /// Remove a modifier. Returns `false` if it was not present.
    pub fn remove_modifier(&mut self, id: ModifierId) -> bool {
        let Some(modifier) = self.modifiers.remove(&id) else {
            return false;
        };
        debug!(modifier = %id, description = %modifier.description(), "removing modifier");

        let form = modifier.form();
        let path = normalized(form.node_type(), &modifier.source().path());
        let main = PathDefinition::main();
        for stat in modifier.stats() {
            let Some(graph) = self.stats.get_mut(stat) else {
                continue;
            };
            let Some(delta) = graph
                .collection_mut(form, &path)
                .and_then(|collection| collection.remove(&id))
            else {
                continue;
            };
            let count = graph.decrement_modifiers();
            let path_now_empty = !graph.path_has_members(&path);
            let owner = graph.stat().clone();

            self.events.submit_collection(
                CollectionKey {
                    stat: stat.clone(),
                    form,
                    path: path.clone(),
                },
                delta,
            );
            self.invalidate_existing(stat, form.node_type(), &path);
            if !path.is_main() && path_now_empty {
                self.invalidate_existing(stat, NodeType::UncappedSubtotal, &main);
            }
            if count == 0 {
                if let Some((source, target)) = self.conversions.unregister(&owner) {
                    debug!(source = %source, target = %target, "unlinked conversion");
                    self.conversion_changed(&source, &target);
                }
            }
        }

        if let Some(node) = self.modifier_nodes.remove(&id) {
            self.remove_node(node);
        }
        true
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    fn allocate_subscription(&mut self) -> SubscriptionId {
        self.next_subscription += 1;
        SubscriptionId(self.next_subscription)
    }

    pub fn subscribe_node(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
        callback: ValueCallback,
    ) -> StatResult<SubscriptionId> {
        let index = self.get_or_create_node(stat, node_type, path)?;
        let id = self.allocate_subscription();
        if let Some(node) = self.arena.node_weight_mut(index) {
            node.subscribers.push((id, callback));
        }
        self.subscriptions.insert(id, SubscriptionTarget::Node(index));
        // Changes only reach a node along edges recorded by its last computation.
        self.settle(index);
        Ok(id)
    }

    /// Compute a subscribed node so its dependency edges are current.
    fn settle(&mut self, index: NodeIndex) {
        if let Err(err) = self.evaluate(index) {
            if let Some(node) = self.arena.node_weight(index) {
                warn!(node = %node.key, error = %err, "subscribed node failed to compute");
            }
        }
    }

    pub fn subscribe_collection(
        &mut self,
        stat: &Stat,
        form: Form,
        path: &PathDefinition,
        callback: CollectionCallback,
    ) -> StatResult<SubscriptionId> {
        if !stat.is_resolved() {
            return Err(StatError::UnresolvedReference(stat.clone()));
        }
        let path = normalized(form.node_type(), path);
        self.ensure_stat_graph(stat);
        let id = self.allocate_subscription();
        if let Some(graph) = self.stats.get_mut(stat) {
            graph
                .collection_or_default(form, &path)
                .subscribers
                .push((id, callback));
        }
        self.subscriptions.insert(
            id,
            SubscriptionTarget::Collection(CollectionKey {
                stat: stat.clone(),
                form,
                path,
            }),
        );
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> StatResult<()> {
        match self.subscriptions.remove(&id) {
            None => Err(StatError::UnknownSubscription(id)),
            Some(SubscriptionTarget::Node(index)) => {
                if let Some(node) = self.arena.node_weight_mut(index) {
                    node.subscribers.retain(|(sub, _)| *sub != id);
                }
                Ok(())
            }
            Some(SubscriptionTarget::Collection(key)) => {
                if let Some(collection) = self
                    .stats
                    .get_mut(&key.stat)
                    .and_then(|graph| graph.collection_mut(key.form, &key.path))
                {
                    collection.subscribers.retain(|(sub, _)| *sub != id);
                }
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Notification
    // ---------------------------------------------------------------------

    /// Deliver all buffered changes: collection deltas first, then node
    /// changes with producers before consumers.
    pub fn flush(&mut self, deliver_collections: bool) {
        let pending = self.events.take();
        if pending.is_empty() {
            return;
        }
        debug!(
            nodes = pending.nodes.len(),
            collections = pending.collections.len(),
            "flushing changes"
        );
        if deliver_collections {
            for (key, delta) in pending.collections {
                let Some(collection) = self
                    .stats
                    .get_mut(&key.stat)
                    .and_then(|graph| graph.collection_mut(key.form, &key.path))
                else {
                    continue;
                };
                if collection.subscribers.is_empty() {
                    continue;
                }
                let event = CollectionChanged {
                    stat: key.stat,
                    form: key.form,
                    path: key.path,
                    added: delta.added,
                    removed: delta.removed,
                };
                for (_, callback) in collection.subscribers.iter_mut() {
                    callback(&event);
                }
            }
        }

        let subscribed: Vec<NodeIndex> = pending
            .nodes
            .into_iter()
            .filter(|index| {
                self.arena
                    .node_weight(*index)
                    .is_some_and(|node| node.subscriber_count() > 0)
            })
            .collect();
        for index in self.dependency_order(subscribed) {
            self.notify_node(index);
        }
    }

    fn dependency_order(&self, mut nodes: Vec<NodeIndex>) -> Vec<NodeIndex> {
        if nodes.len() < 2 {
            return nodes;
        }
        match toposort(&self.arena, None) {
            Ok(order) => {
                let position: HashMap<NodeIndex, usize> = order
                    .into_iter()
                    .enumerate()
                    .map(|(position, index)| (index, position))
                    .collect();
                nodes.sort_by_key(|index| position.get(index).copied().unwrap_or(usize::MAX));
                nodes
            }
            Err(cycle) => {
                warn!(node = ?cycle.node_id(), "dependency cycle while ordering notifications");
                nodes
            }
        }
    }

    fn notify_node(&mut self, index: NodeIndex) {
        self.settle(index);
        let Some(node) = self.arena.node_weight_mut(index) else {
            return;
        };
        let event = ValueChanged {
            key: node.key.clone(),
        };
        let mut subscribers = std::mem::take(&mut node.subscribers);
        trace!(node = %event.key, subscribers = subscribers.len(), "notifying");
        {
            let mut evaluation = Evaluation::new(self);
            let context: &mut dyn CalculationContext = &mut evaluation;
            for (_, callback) in subscribers.iter_mut() {
                callback(&event, &mut *context);
            }
        }
        if let Some(node) = self.arena.node_weight_mut(index) {
            node.subscribers = subscribers;
        }
    }

    pub fn subscriber_count(&self, stat: &Stat, node_type: NodeType, path: &PathDefinition) -> usize {
        self.node_index(stat, node_type, path)
            .and_then(|index| self.arena.node_weight(index))
            .map_or(0, CalculationNode::subscriber_count)
    }

    pub fn collection_subscriber_count(&self, stat: &Stat, form: Form, path: &PathDefinition) -> usize {
        self.stats
            .get(stat)
            .and_then(|graph| graph.collection(form, &normalized(form.node_type(), path)))
            .map_or(0, |collection| collection.subscriber_count())
    }
}

/// One node computation: a context that records every node it reads.
pub(crate) struct Evaluation<'a> {
    graph: &'a mut CalculationGraph,
    reads: IndexSet<NodeIndex>,
}

impl<'a> Evaluation<'a> {
    pub fn new(graph: &'a mut CalculationGraph) -> Self {
        Self {
            graph,
            reads: IndexSet::new(),
        }
    }

    pub fn into_reads(self) -> IndexSet<NodeIndex> {
        self.reads
    }

    fn read_node(&mut self, index: NodeIndex) -> StatResult<Option<NodeValue>> {
        self.reads.insert(index);
        self.graph.evaluate(index)
    }

    fn read_modifier(&mut self, id: ModifierId) -> StatResult<Option<NodeValue>> {
        match self.graph.modifier_nodes.get(&id).copied() {
            Some(index) => self.read_node(index),
            None => Ok(None),
        }
    }

    fn members(&self, stat: &Stat, form: Form, path: &PathDefinition) -> Vec<ModifierId> {
        self.graph
            .stats
            .get(stat)
            .map(|graph| graph.members(form, path))
            .unwrap_or_default()
    }

    fn contributions(
        &mut self,
        stat: &Stat,
        form: Form,
        path: &PathDefinition,
    ) -> StatResult<Vec<Option<NodeValue>>> {
        let mut values = Vec::new();
        for id in self.members(stat, form, path) {
            values.push(self.read_modifier(id)?);
        }
        Ok(values)
    }

    fn compute(&mut self, key: &NodeKey) -> StatResult<Option<NodeValue>> {
        match key {
            NodeKey::Modifier(id) => {
                let Some(modifier) = self.graph.modifiers.get(id).cloned() else {
                    return Ok(None);
                };
                degrade(self.modifier_value(&modifier), key)
            }
            NodeKey::Stat {
                stat,
                node_type,
                path,
            } => {
                // The graph's copy carries the metadata the stat was created with.
                let stat = self
                    .graph
                    .stats
                    .get(stat)
                    .map(|graph| graph.stat().clone())
                    .unwrap_or_else(|| stat.clone());
                let aggregated = self.aggregate(&stat, *node_type, path)?;
                degrade(self.apply_behaviors(&stat, *node_type, path, aggregated), key)
            }
        }
    }

    fn modifier_value(&mut self, modifier: &Modifier) -> StatResult<Option<NodeValue>> {
        if let Some(condition) = modifier.condition() {
            let value = condition.calculate(self)?;
            if !condition_holds(value, &condition.description())? {
                return Ok(None);
            }
        }
        modifier.value().calculate(self)
    }

    fn apply_behaviors(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
        mut value: Option<NodeValue>,
    ) -> StatResult<Option<NodeValue>> {
        for transformation in self.graph.behaviors.transformations_for(stat, node_type, path) {
            value = transformation.transform(value, self)?;
        }
        Ok(value)
    }

    fn aggregate(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> StatResult<Option<NodeValue>> {
        let main = PathDefinition::main();
        match node_type {
            NodeType::BaseSet => self.base_set(stat, path),
            NodeType::BaseAdd => Ok(sum_present(self.contributions(stat, Form::BaseAdd, path)?)),
            NodeType::Increase => {
                let own = sum_present(self.contributions(stat, Form::Increase, path)?);
                let mut increase = own.unwrap_or(NodeValue::from(0.0));
                if !path.is_main() {
                    if let Some(global) = self.value(stat, NodeType::Increase, &main)? {
                        increase = increase + global;
                    }
                }
                Ok(Some(increase))
            }
            NodeType::More => {
                let factors = self
                    .contributions(stat, Form::More, path)?
                    .into_iter()
                    .map(|value| value.map(|v| v.map(|x| (100.0 + x) / 100.0)));
                let mut more = product_present(factors).unwrap_or(NodeValue::from(1.0));
                if !path.is_main() {
                    if let Some(global) = self.value(stat, NodeType::More, &main)? {
                        more = more * global;
                    }
                }
                Ok(Some(more))
            }
            NodeType::Base => self.base(stat, path),
            NodeType::PathTotal => self.path_total(stat, path),
            NodeType::TotalOverride => Ok(self
                .contributions(stat, Form::TotalOverride, &main)?
                .into_iter()
                .flatten()
                .max_by(NodeValue::total_cmp)),
            NodeType::UncappedSubtotal => {
                let mut totals = Vec::new();
                for path in self.graph.paths_of(stat) {
                    totals.push(self.value(stat, NodeType::PathTotal, &path)?);
                }
                Ok(sum_present(totals))
            }
            NodeType::Subtotal => {
                let Some(uncapped) = self.value(stat, NodeType::UncappedSubtotal, &main)? else {
                    return Ok(None);
                };
                let lower = match stat.minimum() {
                    Some(minimum) => self.total(minimum)?,
                    None => None,
                };
                let upper = match stat.maximum() {
                    Some(maximum) => self.total(maximum)?,
                    None => None,
                };
                Ok(Some(uncapped.clamp(lower, upper)))
            }
            NodeType::Total => {
                let value = match self.value(stat, NodeType::TotalOverride, &main)? {
                    Some(value) => Some(value),
                    None => self.value(stat, NodeType::Subtotal, &main)?,
                };
                Ok(value.map(|value| finalize(stat, value)))
            }
        }
    }

    /// Highest source priority wins; among equals the last inserted.
    fn base_set(&mut self, stat: &Stat, path: &PathDefinition) -> StatResult<Option<NodeValue>> {
        let mut best: Option<(u8, NodeValue)> = None;
        for id in self.members(stat, Form::BaseSet, path) {
            let Some(value) = self.read_modifier(id)? else {
                continue;
            };
            let priority = self
                .graph
                .modifiers
                .get(&id)
                .map_or(0, |modifier| modifier.source().priority());
            if best.map_or(true, |(current, _)| priority >= current) {
                best = Some((priority, value));
            }
        }
        Ok(best.map(|(_, value)| value))
    }

    fn base(&mut self, stat: &Stat, path: &PathDefinition) -> StatResult<Option<NodeValue>> {
        let set = self.value(stat, NodeType::BaseSet, path)?;
        let add = self.value(stat, NodeType::BaseAdd, path)?;
        let own = match (set, add) {
            (None, None) => None,
            (set, add) => {
                let zero = NodeValue::from(0.0);
                Some(set.unwrap_or(zero) + add.unwrap_or(zero))
            }
        };
        match path.converted_stat() {
            Some(source) => {
                let converted = self.converted_base(source, stat)?;
                Ok(sum_present([own, converted]))
            }
            None => Ok(own),
        }
    }

    /// Share of `source`'s main-path base that ends up in `target`.
    fn converted_base(&mut self, source: &Stat, target: &Stat) -> StatResult<Option<NodeValue>> {
        let Some(link) = self.graph.conversions.link(source, target).cloned() else {
            return Ok(None);
        };
        let Some(source_base) = self.value(source, NodeType::Base, &PathDefinition::main())? else {
            return Ok(None);
        };
        let mut share = NodeValue::from(0.0);
        if let Some(conversion) = &link.conversion {
            if let Some(percent) = self.total(conversion)? {
                let sum = self.conversion_sum(source)?;
                share = share + effective_conversion(percent, sum);
            }
        }
        if let Some(gain) = &link.gain {
            if let Some(percent) = self.total(gain)? {
                share = share + percent;
            }
        }
        Ok(Some((source_base * share).map(|v| v / 100.0)))
    }

    /// Sum of every conversion percentage applied to `source`.
    fn conversion_sum(&mut self, source: &Stat) -> StatResult<NodeValue> {
        let mut sum = NodeValue::from(0.0);
        for conversion in self.graph.conversions.conversion_stats(source) {
            if let Some(percent) = self.total(&conversion)? {
                sum = sum + percent;
            }
        }
        Ok(sum)
    }

    fn path_total(&mut self, stat: &Stat, path: &PathDefinition) -> StatResult<Option<NodeValue>> {
        let Some(base) = self.value(stat, NodeType::Base, path)? else {
            return Ok(None);
        };
        let increase = self
            .value(stat, NodeType::Increase, path)?
            .unwrap_or(NodeValue::from(0.0));
        let more = self
            .value(stat, NodeType::More, path)?
            .unwrap_or(NodeValue::from(1.0));
        let mut total = (base * increase.map(|i| 100.0 + i)).map(|v| v / 100.0) * more;
        if path.is_main() && self.graph.conversions.is_converted(stat) {
            let sum = self.conversion_sum(stat)?;
            total = total * retained_fraction(sum);
        }
        Ok(Some(total))
    }
}

impl CalculationContext for Evaluation<'_> {
    fn value(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> StatResult<Option<NodeValue>> {
        let index = self.graph.get_or_create_node(stat, node_type, path)?;
        self.read_node(index)
    }
}

/// Turn a stage-local failure into an absent value.
fn degrade(result: StatResult<Option<NodeValue>>, key: &NodeKey) -> StatResult<Option<NodeValue>> {
    match result {
        Err(err) if err.is_stage_local() => {
            warn!(node = %key, error = %err, "contribution degraded to absent");
            Ok(None)
        }
        other => other,
    }
}

/// Apply the stat's rounding and data type to its `Total`.
fn finalize(stat: &Stat, value: NodeValue) -> NodeValue {
    let rounded = value.round(stat.effective_rounding());
    match stat.data_type() {
        DataType::Bool => NodeValue::from(rounded.is_true()),
        DataType::Enum { variants } => {
            let last = f64::from(variants.saturating_sub(1));
            rounded.map(|v| v.clamp(0.0, last))
        }
        DataType::Double | DataType::Int => rounded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_fn::StatReference;

    fn main() -> PathDefinition {
        PathDefinition::main()
    }

    #[test]
    fn test_chain_is_created_eagerly() {
        let mut graph = CalculationGraph::new();
        let life = Stat::new("Life");
        graph
            .get_or_create_node(&life, NodeType::BaseAdd, &main())
            .unwrap();
        for node_type in [
            NodeType::BaseAdd,
            NodeType::Base,
            NodeType::PathTotal,
            NodeType::UncappedSubtotal,
            NodeType::Subtotal,
            NodeType::Total,
        ] {
            assert!(graph.node_index(&life, node_type, &main()).is_some());
        }
        assert!(graph.node_index(&life, NodeType::More, &main()).is_none());
        assert_eq!(graph.arena.edge_count(), 0);
    }

    #[test]
    fn test_evaluation_wires_dependencies() {
        let mut graph = CalculationGraph::new();
        let life = Stat::new("Life");
        graph.add_modifier(&Modifier::base_add(&life, 10.0)).unwrap();
        assert_eq!(
            graph.value(&life, NodeType::Total, &main()).unwrap(),
            Some(NodeValue::from(10.0))
        );

        let base_add = graph.node_index(&life, NodeType::BaseAdd, &main()).unwrap();
        let base = graph.node_index(&life, NodeType::Base, &main()).unwrap();
        assert!(graph.arena.contains_edge(base_add, base));
    }

    #[test]
    fn test_invalidation_reaches_consumers() {
        let mut graph = CalculationGraph::new();
        let life = Stat::new("Life");
        graph.add_modifier(&Modifier::base_add(&life, 10.0)).unwrap();
        graph.value(&life, NodeType::Total, &main()).unwrap();
        graph.events.take();

        let total = graph.node_index(&life, NodeType::Total, &main()).unwrap();
        assert!(graph.arena[total].cached().is_some());

        let base_add = graph.node_index(&life, NodeType::BaseAdd, &main()).unwrap();
        graph.invalidate(base_add);
        assert!(graph.arena[total].cached().is_none());
        assert!(graph.events.take().nodes.contains(&total));
    }

    #[test]
    fn test_cycle_path_lists_nodes() {
        let mut graph = CalculationGraph::new();
        let a = Stat::new("A");
        let b = Stat::new("B");
        graph
            .add_modifier(&Modifier::new(
                vec![a.clone()],
                Form::BaseAdd,
                StatReference::total(b.clone()),
            ))
            .unwrap();
        graph
            .add_modifier(&Modifier::new(
                vec![b.clone()],
                Form::BaseAdd,
                StatReference::total(a.clone()),
            ))
            .unwrap();

        match graph.value(&a, NodeType::Total, &main()) {
            Err(StatError::Cycle { path }) => {
                let a_total = NodeKey::stat(a.clone(), NodeType::Total, main());
                assert_eq!(path.first(), Some(&a_total));
                assert_eq!(path.last(), Some(&a_total));
                assert!(path.contains(&NodeKey::stat(b.clone(), NodeType::Total, main())));
            }
            other => panic!("Expected cycle, got {:?}", other),
        }

        // Nothing is left half-computed.
        let a_total = graph.node_index(&a, NodeType::Total, &main()).unwrap();
        assert_eq!(graph.arena[a_total].state, NodeState::Stale);
        assert!(graph.evaluation_stack.is_empty());
        // The failed total still depends on what it read.
        assert!(graph
            .arena
            .neighbors_directed(a_total, Direction::Incoming)
            .next()
            .is_some());
    }

    #[test]
    fn test_remove_modifier_drops_value_node() {
        let mut graph = CalculationGraph::new();
        let life = Stat::new("Life");
        let modifier = Modifier::base_add(&life, 10.0);
        graph.add_modifier(&modifier).unwrap();
        let nodes_with_modifier = graph.arena.node_count();

        assert!(graph.remove_modifier(modifier.id()));
        assert!(!graph.remove_modifier(modifier.id()));
        assert_eq!(graph.arena.node_count(), nodes_with_modifier - 1);
        assert_eq!(graph.value(&life, NodeType::Total, &main()).unwrap(), None);
    }

    #[test]
    fn test_finalize_data_types() {
        let flag = Stat::new("Flag").with_data_type(DataType::Bool);
        assert_eq!(finalize(&flag, NodeValue::from(7.0)), NodeValue::from(1.0));

        let mode = Stat::new("Mode").with_data_type(DataType::Enum { variants: 3 });
        assert_eq!(finalize(&mode, NodeValue::from(5.5)), NodeValue::from(2.0));

        let count = Stat::new("Count").with_data_type(DataType::Int);
        assert_eq!(finalize(&count, NodeValue::from(2.9)), NodeValue::from(2.0));
    }
}
