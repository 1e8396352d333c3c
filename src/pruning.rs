//! Graph pruning module.
//!
//! Nodes are created on demand and never freed by the reads that created
//! them. The pruner reclaims them in an explicit reachability pass:
//!
//! 1. Roots are nodes with at least one subscriber plus the `Total` of every
//!    registered stat.
//! 2. Everything the roots (transitively) read is live.
//! 3. Non-live stat nodes, empty unsubscribed collections and stat graphs left
//!    with neither are removed, as far as the [`PruneRules`] allow.
//!
//! Modifier value nodes are owned by their modifier and are never removed;
//! when they are not live their cache and dependency edges are dropped.

use crate::error::{StatError, StatResult};
use crate::graph::CalculationGraph;
use crate::node::{Form, NodeKey, NodeType};
use crate::path::PathDefinition;
use crate::stat::Stat;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Which unreachable parts of the graph may be removed.
///
/// Every method defaults to allowing removal.
///
/// # Examples
///
/// ```rust
/// use statgraph::{NodeType, PathDefinition, PruneRules, Stat};
///
/// /// Keeps every stat's `Total` cached, even without subscribers.
/// struct KeepTotals;
///
/// impl PruneRules for KeepTotals {
///     fn select_removable_nodes_by_node_type(
///         &self,
///         _stat: &Stat,
///         node_type: NodeType,
///         _path: &PathDefinition,
///     ) -> bool {
///         node_type != NodeType::Total
///     }
/// }
/// ```
pub trait PruneRules {
    /// Whether the nodes and collections of `stat` are looked at at all.
    fn can_stat_be_considered_for_removal(&self, _stat: &Stat) -> bool {
        true
    }

    /// Whether an unreachable node may be removed.
    fn select_removable_nodes_by_node_type(
        &self,
        _stat: &Stat,
        _node_type: NodeType,
        _path: &PathDefinition,
    ) -> bool {
        true
    }

    /// Whether an empty, unsubscribed collection may be removed.
    fn select_removable_nodes_by_form(&self, _stat: &Stat, _form: Form, _path: &PathDefinition) -> bool {
        true
    }

    /// Whether a stat graph without nodes or collections may be removed.
    fn can_stat_graph_be_removed(&self, _stat: &Stat) -> bool {
        true
    }
}

/// Removes everything unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPruneRules;

impl PruneRules for DefaultPruneRules {}

/// What a pruning pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub removed_nodes: usize,
    pub removed_collections: usize,
    pub removed_stat_graphs: usize,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.removed_nodes == 0 && self.removed_collections == 0 && self.removed_stat_graphs == 0
    }
}

impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} collections, {} stat graphs",
            self.removed_nodes, self.removed_collections, self.removed_stat_graphs
        )
    }
}

impl CalculationGraph {
    /// Nodes reachable (against the edge direction) from the roots.
    fn live_nodes(&self) -> HashSet<NodeIndex> {
        let mut roots: Vec<NodeIndex> = self
            .arena
            .node_indices()
            .filter(|index| self.arena[*index].subscriber_count() > 0)
            .collect();
        for stat in &self.registered {
            if let Some(index) = self.node_index(stat, NodeType::Total, &PathDefinition::main()) {
                roots.push(index);
            }
        }

        let reversed = Reversed(&self.arena);
        let mut dfs = Dfs::empty(reversed);
        let mut live = HashSet::new();
        for root in roots {
            dfs.move_to(root);
            while let Some(index) = dfs.next(reversed) {
                live.insert(index);
            }
        }
        live
    }

    /// Run one pruning pass.
    ///
    /// Fails with `BatchOpen` while a batch is open, so pruning always
    /// happens after pending changes were delivered.
    pub(crate) fn prune(&mut self, rules: &dyn PruneRules) -> StatResult<PruneReport> {
        if self.events.is_buffering() {
            return Err(StatError::BatchOpen);
        }
        let live = self.live_nodes();
        let mut report = PruneReport::default();

        let stats: Vec<Stat> = self.stats.keys().cloned().collect();
        for stat in &stats {
            if !rules.can_stat_be_considered_for_removal(stat) {
                continue;
            }
            let Some(graph) = self.stats.get(stat) else {
                continue;
            };
            let removable_nodes: Vec<NodeIndex> = graph
                .nodes()
                .filter(|((node_type, path), index)| {
                    !live.contains(*index)
                        && rules.select_removable_nodes_by_node_type(stat, *node_type, path)
                })
                .map(|(_, index)| *index)
                .collect();
            let removable_collections: Vec<(Form, PathDefinition)> = graph
                .collections()
                .filter(|((form, path), collection)| {
                    collection.is_empty()
                        && collection.subscriber_count() == 0
                        && rules.select_removable_nodes_by_form(stat, *form, path)
                })
                .map(|(key, _)| key.clone())
                .collect();

            for index in removable_nodes {
                self.remove_node(index);
                report.removed_nodes += 1;
            }
            if let Some(graph) = self.stats.get_mut(stat) {
                for (form, path) in removable_collections {
                    if graph.remove_collection(form, &path) {
                        report.removed_collections += 1;
                    }
                }
            }
        }

        // What is unreachable but kept must not hold on to cached values.
        let retained: Vec<NodeIndex> = self
            .arena
            .node_indices()
            .filter(|index| !live.contains(index))
            .collect();
        for index in retained {
            if matches!(self.arena[index].key, NodeKey::Modifier(_)) {
                self.reset_modifier_node(index);
            } else {
                self.arena[index].invalidate();
            }
        }

        let empty: Vec<Stat> = self
            .stats
            .iter()
            .filter(|(stat, graph)| {
                graph.is_empty()
                    && !self.registered.contains(*stat)
                    && rules.can_stat_graph_be_removed(stat)
            })
            .map(|(stat, _)| stat.clone())
            .collect();
        for stat in empty {
            self.remove_stat_graph(&stat);
            report.removed_stat_graphs += 1;
        }

        if !report.is_empty() {
            debug!(
                removed_nodes = report.removed_nodes,
                removed_collections = report.removed_collections,
                removed_stat_graphs = report.removed_stat_graphs,
                remaining_nodes = self.arena.node_count(),
                active_behaviors = self.behaviors.len(),
                "pruned graph"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::Modifier;

    struct KeepEverything;

    impl PruneRules for KeepEverything {
        fn can_stat_be_considered_for_removal(&self, _stat: &Stat) -> bool {
            false
        }

        fn can_stat_graph_be_removed(&self, _stat: &Stat) -> bool {
            false
        }
    }

    #[test]
    fn test_prune_refuses_open_batch() {
        let mut graph = CalculationGraph::new();
        graph.events.suspend();
        assert_eq!(graph.prune(&DefaultPruneRules), Err(StatError::BatchOpen));
    }

    #[test]
    fn test_unreferenced_nodes_are_removed() {
        let mut graph = CalculationGraph::new();
        let life = Stat::new("Life");
        let modifier = Modifier::base_add(&life, 10.0);
        graph.add_modifier(&modifier).unwrap();
        graph
            .value(&life, NodeType::Total, &PathDefinition::main())
            .unwrap();

        let report = graph.prune(&DefaultPruneRules).unwrap();
        assert!(report.removed_nodes > 0);
        assert_eq!(report.removed_stat_graphs, 0);
        // Only the modifier's value node is left; the collection keeps the graph.
        assert_eq!(graph.arena.node_count(), 1);
        assert_eq!(graph.stats.len(), 1);

        graph.remove_modifier(modifier.id());
        let report = graph.prune(&DefaultPruneRules).unwrap();
        assert_eq!(report.removed_collections, 1);
        assert_eq!(report.removed_stat_graphs, 1);
        assert_eq!(graph.arena.node_count(), 0);
        assert!(graph.stats.is_empty());
    }

    #[test]
    fn test_registered_totals_are_roots() {
        let mut graph = CalculationGraph::new();
        let life = Stat::new("Life");
        graph.add_modifier(&Modifier::base_add(&life, 10.0)).unwrap();
        graph
            .get_or_create_node(&life, NodeType::Total, &PathDefinition::main())
            .unwrap();
        graph.registered.insert(life.clone());
        graph
            .value(&life, NodeType::Total, &PathDefinition::main())
            .unwrap();

        let before = graph.arena.node_count();
        graph.prune(&DefaultPruneRules).unwrap();
        assert_eq!(graph.arena.node_count(), before);
    }

    #[test]
    fn test_rules_can_veto_removal() {
        let mut graph = CalculationGraph::new();
        let life = Stat::new("Life");
        graph
            .get_or_create_node(&life, NodeType::Total, &PathDefinition::main())
            .unwrap();
        let report = graph.prune(&KeepEverything).unwrap();
        assert!(report.is_empty());
        assert_eq!(graph.stats.len(), 1);
    }

    #[test]
    fn test_report_display() {
        let report = PruneReport {
            removed_nodes: 3,
            removed_collections: 1,
            removed_stat_graphs: 0,
        };
        assert_eq!(report.to_string(), "3 nodes, 1 collections, 0 stat graphs");
    }
}
