//! Calculator module.
//!
//! Provides the `Calculator` type, the entry point of the crate. It owns the
//! calculation graph and coordinates the three phases of every change:
//!
//! 1. **Mutate** - modifiers are added or removed, affected nodes go stale
//! 2. **Notify** - when the outermost batch closes, buffered changes are
//!    delivered to subscribers once each
//! 3. **Prune** - nodes nobody observes any more are reclaimed

use crate::breakdown::StatBreakdown;
use crate::config::CalculatorConfig;
use crate::error::StatResult;
use crate::events::{CollectionChanged, SubscriptionId, ValueChanged};
use crate::graph::CalculationGraph;
use crate::modifier::Modifier;
use crate::node::{Form, NodeType};
use crate::path::PathDefinition;
use crate::pruning::{DefaultPruneRules, PruneReport, PruneRules};
use crate::stat::Stat;
use crate::value::NodeValue;
use crate::value_fn::CalculationContext;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

/// The stat calculator.
///
/// Values are computed lazily and cached; changes are batched, delivered
/// once per batch to subscribers and followed by a pruning pass.
///
/// # Examples
///
/// ```rust
/// use statgraph::{Calculator, Modifier, Stat};
///
/// let life = Stat::new("Life");
/// let mut calculator = Calculator::new();
///
/// let flat = Modifier::base_add(&life, 50.0);
/// let increased = Modifier::increase(&life, 20.0);
/// calculator.add_modifier(&flat).unwrap();
/// calculator.add_modifier(&increased).unwrap();
/// assert_eq!(calculator.total(&life).unwrap(), Some(60.0.into()));
///
/// calculator.remove_modifier(&increased).unwrap();
/// assert_eq!(calculator.total(&life).unwrap(), Some(50.0.into()));
///
/// calculator.add_modifier(&Modifier::total_override(&life, 999.0)).unwrap();
/// assert_eq!(calculator.total(&life).unwrap(), Some(999.0.into()));
/// ```
pub struct Calculator {
    graph: CalculationGraph,
    config: CalculatorConfig,
    rules: Box<dyn PruneRules>,
}

impl Calculator {
    /// Create a calculator with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CalculatorConfig::default())
    }

    pub fn with_config(config: CalculatorConfig) -> Self {
        Self {
            graph: CalculationGraph::new(),
            config,
            rules: Box::new(DefaultPruneRules),
        }
    }

    /// Replace the pruning rules.
    pub fn with_rules(mut self, rules: impl PruneRules + 'static) -> Self {
        self.rules = Box::new(rules);
        self
    }

    pub fn config(&self) -> &CalculatorConfig {
        &self.config
    }

    /// Reads can create stat graphs whose behaviors invalidate other nodes.
    fn flush_if_idle(&mut self) {
        if !self.graph.events.is_buffering() {
            self.graph.flush(self.config.notify_collection_changes);
        }
    }

    /// Run `f` inside its own batch.
    fn in_batch<T>(&mut self, f: impl FnOnce(&mut CalculationGraph) -> StatResult<T>) -> StatResult<T> {
        self.begin_batch();
        let result = f(&mut self.graph);
        let closed = self.end_batch();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Add a modifier.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The modifier was added
    /// * `Ok(false)` - A modifier with the same id is already present
    /// * `Err(StatError::UnresolvedReference)` - A target stat is not bound
    ///   to a concrete entity; nothing was changed
    pub fn add_modifier(&mut self, modifier: &Modifier) -> StatResult<bool> {
        self.in_batch(|graph| graph.add_modifier(modifier))
    }

    /// Remove a modifier. Returns `Ok(false)` if it was not present.
    pub fn remove_modifier(&mut self, modifier: &Modifier) -> StatResult<bool> {
        self.in_batch(|graph| Ok(graph.remove_modifier(modifier.id())))
    }

    /// Add several modifiers in one batch. Returns how many were added.
    ///
    /// Stops at the first modifier that fails; the ones before it stay added.
    pub fn add_modifiers<'a>(
        &mut self,
        modifiers: impl IntoIterator<Item = &'a Modifier>,
    ) -> StatResult<usize> {
        self.in_batch(|graph| {
            let mut added = 0;
            for modifier in modifiers {
                if graph.add_modifier(modifier)? {
                    added += 1;
                }
            }
            Ok(added)
        })
    }

    /// Remove several modifiers in one batch. Returns how many were removed.
    pub fn remove_modifiers<'a>(
        &mut self,
        modifiers: impl IntoIterator<Item = &'a Modifier>,
    ) -> StatResult<usize> {
        self.in_batch(|graph| {
            Ok(modifiers
                .into_iter()
                .filter(|modifier| graph.remove_modifier(modifier.id()))
                .count())
        })
    }

    pub fn modifier_count(&self) -> usize {
        self.graph.modifier_count()
    }

    /// The value of the node `(stat, node_type, path)`.
    ///
    /// Stat-level node types (`TotalOverride`, `UncappedSubtotal`,
    /// `Subtotal`, `Total`) ignore `path`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use statgraph::{Calculator, Modifier, NodeType, PathDefinition, Stat};
    ///
    /// let armour = Stat::new("Armour");
    /// let mut calculator = Calculator::new();
    /// calculator.add_modifier(&Modifier::increase(&armour, 30.0)).unwrap();
    /// calculator.add_modifier(&Modifier::increase(&armour, 15.0)).unwrap();
    ///
    /// let increase = calculator
    ///     .value(&armour, NodeType::Increase, &PathDefinition::main())
    ///     .unwrap();
    /// assert_eq!(increase, Some(45.0.into()));
    /// // No base, so no total.
    /// assert_eq!(calculator.total(&armour).unwrap(), None);
    /// ```
    pub fn value(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> StatResult<Option<NodeValue>> {
        let value = self.graph.value(stat, node_type, path);
        self.flush_if_idle();
        value
    }

    /// The `Total` of a stat.
    pub fn total(&mut self, stat: &Stat) -> StatResult<Option<NodeValue>> {
        self.value(stat, NodeType::Total, &PathDefinition::main())
    }

    /// Subscribe to changes of a node.
    ///
    /// The callback runs when the outermost batch closes, at most once per
    /// batch, and receives a context that reads settled values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use statgraph::{Calculator, Modifier, NodeValue, Stat};
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    ///
    /// let life = Stat::new("Life");
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    ///
    /// let mut calculator = Calculator::new();
    /// let sink = Rc::clone(&seen);
    /// let watched = life.clone();
    /// calculator
    ///     .subscribe_total(&life, move |_event, ctx| {
    ///         sink.borrow_mut().push(ctx.total(&watched).unwrap());
    ///     })
    ///     .unwrap();
    ///
    /// calculator.add_modifier(&Modifier::base_add(&life, 10.0)).unwrap();
    /// assert_eq!(*seen.borrow(), vec![Some(NodeValue::from(10.0))]);
    /// ```
    pub fn subscribe(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
        callback: impl FnMut(&ValueChanged, &mut dyn CalculationContext) + 'static,
    ) -> StatResult<SubscriptionId> {
        let id = self
            .graph
            .subscribe_node(stat, node_type, path, Box::new(callback))?;
        self.flush_if_idle();
        Ok(id)
    }

    pub fn subscribe_total(
        &mut self,
        stat: &Stat,
        callback: impl FnMut(&ValueChanged, &mut dyn CalculationContext) + 'static,
    ) -> StatResult<SubscriptionId> {
        self.subscribe(stat, NodeType::Total, &PathDefinition::main(), callback)
    }

    /// Subscribe to membership changes of the `(form, path)` collection of a
    /// stat.
    pub fn subscribe_collection(
        &mut self,
        stat: &Stat,
        form: Form,
        path: &PathDefinition,
        callback: impl FnMut(&CollectionChanged) + 'static,
    ) -> StatResult<SubscriptionId> {
        self.graph
            .subscribe_collection(stat, form, path, Box::new(callback))
    }

    /// Remove a subscription. Fails with `UnknownSubscription` if the id is
    /// not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> StatResult<()> {
        self.graph.unsubscribe(id)
    }

    pub fn subscriber_count(&self, stat: &Stat, node_type: NodeType, path: &PathDefinition) -> usize {
        self.graph.subscriber_count(stat, node_type, path)
    }

    pub fn collection_subscriber_count(&self, stat: &Stat, form: Form, path: &PathDefinition) -> usize {
        self.graph.collection_subscriber_count(stat, form, path)
    }

    /// Open a batch. Batches nest; only closing the outermost one delivers
    /// changes and prunes.
    pub fn begin_batch(&mut self) {
        self.graph.events.suspend();
    }

    /// Close a batch.
    ///
    /// Fails with `UnbalancedBatch` if no batch is open.
    pub fn end_batch(&mut self) -> StatResult<()> {
        if !self.graph.events.resume()? {
            return Ok(());
        }
        self.graph.flush(self.config.notify_collection_changes);
        if self.config.prune_after_batch {
            self.graph.prune(self.rules.as_ref())?;
            // Removing stat graphs may unregister behaviors.
            if self.graph.events.has_pending() {
                self.graph.flush(self.config.notify_collection_changes);
            }
        }
        Ok(())
    }

    /// Number of currently open batches.
    pub fn batch_depth(&self) -> usize {
        self.graph.events.depth()
    }

    /// Open a batch that closes when the guard is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use statgraph::{Calculator, Modifier, Stat};
    ///
    /// let life = Stat::new("Life");
    /// let mut calculator = Calculator::new();
    /// {
    ///     let mut batch = calculator.batch();
    ///     batch.add_modifier(&Modifier::base_add(&life, 10.0)).unwrap();
    ///     batch.add_modifier(&Modifier::base_add(&life, 15.0)).unwrap();
    /// }
    /// assert_eq!(calculator.total(&life).unwrap(), Some(25.0.into()));
    /// ```
    pub fn batch(&mut self) -> Batch<'_> {
        self.begin_batch();
        Batch { calculator: self }
    }

    /// Run one pruning pass now.
    ///
    /// Fails with `BatchOpen` while a batch is open.
    pub fn prune(&mut self) -> StatResult<PruneReport> {
        let report = self.graph.prune(self.rules.as_ref())?;
        self.graph.flush(self.config.notify_collection_changes);
        Ok(report)
    }

    /// Keep the `Total` of `stat` (and everything it reads) alive across
    /// pruning, subscribed or not.
    pub fn register_stat(&mut self, stat: &Stat) -> StatResult<()> {
        self.in_batch(|graph| {
            graph.get_or_create_node(stat, NodeType::Total, &PathDefinition::main())?;
            if graph.registered.insert(stat.clone()) {
                debug!(stat = %stat, "registered stat");
            }
            Ok(())
        })
    }

    /// Undo [`register_stat`](Self::register_stat). Returns whether the stat
    /// was registered.
    pub fn unregister_stat(&mut self, stat: &Stat) -> StatResult<bool> {
        self.in_batch(|graph| Ok(graph.registered.shift_remove(stat)))
    }

    /// How the `Total` of `stat` was computed.
    pub fn breakdown(&mut self, stat: &Stat) -> StatResult<StatBreakdown> {
        let breakdown = self.graph.breakdown(stat);
        self.flush_if_idle();
        breakdown
    }

    /// Number of nodes in the graph, modifier value nodes included.
    pub fn node_count(&self) -> usize {
        self.graph.arena.node_count()
    }

    pub fn stat_graph_count(&self) -> usize {
        self.graph.stats.len()
    }

    pub fn contains_node(&self, stat: &Stat, node_type: NodeType, path: &PathDefinition) -> bool {
        self.graph.node_index(stat, node_type, path).is_some()
    }

    pub fn contains_stat_graph(&self, stat: &Stat) -> bool {
        self.graph.stats.contains_key(stat)
    }

    /// The paths that make up the `UncappedSubtotal` of `stat`.
    pub fn paths(&self, stat: &Stat) -> Vec<PathDefinition> {
        self.graph.paths_of(stat)
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`Calculator::batch`].
///
/// Dereferences to the calculator; dropping it closes the batch.
pub struct Batch<'a> {
    calculator: &'a mut Calculator,
}

impl Deref for Batch<'_> {
    type Target = Calculator;

    fn deref(&self) -> &Calculator {
        self.calculator
    }
}

impl DerefMut for Batch<'_> {
    fn deref_mut(&mut self) -> &mut Calculator {
        self.calculator
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.calculator.end_batch() {
            warn!(error = %err, "closing batch failed");
        }
    }
}
