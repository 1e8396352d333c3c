//! Per-stat node and collection storage.
//!
//! A `StatGraph` owns the pipeline nodes of one stat (as indices into the
//! shared arena) and the modifier collections feeding them. Node values and
//! wiring live in the arena; this type only answers "which node is
//! `(node type, path)` of this stat" and "which modifiers sit in
//! `(form, path)`".

use crate::collection::NodeCollection;
use crate::modifier::ModifierId;
use crate::node::{Form, NodeType};
use crate::path::PathDefinition;
use crate::stat::Stat;
use indexmap::{IndexMap, IndexSet};
use petgraph::stable_graph::NodeIndex;

pub(crate) struct StatGraph {
    /// The stat as first seen by the graph; its metadata is the one used.
    stat: Stat,
    nodes: IndexMap<(NodeType, PathDefinition), NodeIndex>,
    collections: IndexMap<(Form, PathDefinition), NodeCollection<ModifierId>>,
    /// Number of modifier memberships across all collections.
    modifier_count: usize,
}

impl StatGraph {
    pub fn new(stat: Stat) -> Self {
        Self {
            stat,
            nodes: IndexMap::new(),
            collections: IndexMap::new(),
            modifier_count: 0,
        }
    }

    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    pub fn node(&self, node_type: NodeType, path: &PathDefinition) -> Option<NodeIndex> {
        self.nodes.get(&(node_type, path.clone())).copied()
    }

    pub fn insert_node(&mut self, node_type: NodeType, path: PathDefinition, index: NodeIndex) {
        self.nodes.insert((node_type, path), index);
    }

    pub fn remove_node(&mut self, node_type: NodeType, path: &PathDefinition) -> Option<NodeIndex> {
        self.nodes.shift_remove(&(node_type, path.clone()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&(NodeType, PathDefinition), &NodeIndex)> {
        self.nodes.iter()
    }

    pub fn collection(&self, form: Form, path: &PathDefinition) -> Option<&NodeCollection<ModifierId>> {
        self.collections.get(&(form, path.clone()))
    }

    pub fn collection_mut(
        &mut self,
        form: Form,
        path: &PathDefinition,
    ) -> Option<&mut NodeCollection<ModifierId>> {
        self.collections.get_mut(&(form, path.clone()))
    }

    pub fn collection_or_default(
        &mut self,
        form: Form,
        path: &PathDefinition,
    ) -> &mut NodeCollection<ModifierId> {
        self.collections.entry((form, path.clone())).or_default()
    }

    pub fn remove_collection(&mut self, form: Form, path: &PathDefinition) -> bool {
        self.collections.shift_remove(&(form, path.clone())).is_some()
    }

    pub fn collections(
        &self,
    ) -> impl Iterator<Item = (&(Form, PathDefinition), &NodeCollection<ModifierId>)> {
        self.collections.iter()
    }

    /// Members of `(form, path)` in insertion order.
    pub fn members(&self, form: Form, path: &PathDefinition) -> Vec<ModifierId> {
        self.collection(form, path)
            .map(|collection| collection.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether any collection on `path` has members.
    pub fn path_has_members(&self, path: &PathDefinition) -> bool {
        self.collections
            .iter()
            .any(|((_, p), collection)| p == path && !collection.is_empty())
    }

    /// The main path followed by every other path with at least one member.
    pub fn own_paths(&self) -> Vec<PathDefinition> {
        let mut paths = IndexSet::new();
        paths.insert(PathDefinition::main());
        for ((_, path), collection) in &self.collections {
            if !collection.is_empty() {
                paths.insert(path.clone());
            }
        }
        paths.into_iter().collect()
    }

    pub fn increment_modifiers(&mut self) -> usize {
        self.modifier_count += 1;
        self.modifier_count
    }

    pub fn decrement_modifiers(&mut self) -> usize {
        self.modifier_count = self.modifier_count.saturating_sub(1);
        self.modifier_count
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ModifierSource;

    #[test]
    fn test_own_paths_skip_empty_collections() {
        let mut graph = StatGraph::new(Stat::new("Life"));
        let weapon = ModifierSource::local("Weapon").path();
        let ring = ModifierSource::local("Ring").path();

        graph
            .collection_or_default(Form::BaseAdd, &weapon)
            .add(ModifierId::next());
        graph.collection_or_default(Form::BaseAdd, &ring);

        assert_eq!(graph.own_paths(), vec![PathDefinition::main(), weapon.clone()]);
        assert!(graph.path_has_members(&weapon));
        assert!(!graph.path_has_members(&ring));
    }

    #[test]
    fn test_members_in_insertion_order() {
        let mut graph = StatGraph::new(Stat::new("Life"));
        let main = PathDefinition::main();
        let a = ModifierId::next();
        let b = ModifierId::next();
        graph.collection_or_default(Form::BaseSet, &main).add(b);
        graph.collection_or_default(Form::BaseSet, &main).add(a);
        assert_eq!(graph.members(Form::BaseSet, &main), vec![b, a]);
        assert!(graph.members(Form::More, &main).is_empty());
    }

    #[test]
    fn test_emptiness() {
        let mut graph = StatGraph::new(Stat::new("Mana"));
        assert!(graph.is_empty());

        let main = PathDefinition::main();
        graph.insert_node(NodeType::Total, main.clone(), NodeIndex::new(0));
        assert!(!graph.is_empty());
        assert_eq!(graph.node(NodeType::Total, &main), Some(NodeIndex::new(0)));

        graph.remove_node(NodeType::Total, &main);
        graph.collection_or_default(Form::More, &main);
        assert!(!graph.is_empty());
        assert!(graph.remove_collection(Form::More, &main));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_modifier_count() {
        let mut graph = StatGraph::new(Stat::new("Mana"));
        assert_eq!(graph.increment_modifiers(), 1);
        assert_eq!(graph.decrement_modifiers(), 0);
        assert_eq!(graph.decrement_modifiers(), 0);
    }
}
