//! Behaviors module.
//!
//! A behavior is a rule attached to a stat that rewrites the values of other
//! stats' nodes while the owning stat is present in the graph. Behaviors are
//! registered when the owner's stat graph is first created and unregistered
//! when the pruner removes it; the nodes they touch are invalidated both
//! times.

use crate::error::StatResult;
use crate::node::NodeType;
use crate::path::PathDefinition;
use crate::stat::Stat;
use crate::value::NodeValue;
use crate::value_fn::CalculationContext;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which paths of an affected node type a behavior applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathRule {
    #[default]
    All,
    MainOnly,
    /// Only paths holding converted values.
    ConversionOnly,
    /// Every path except converted ones.
    NonConversion,
}

impl PathRule {
    pub fn matches(self, path: &PathDefinition) -> bool {
        match self {
            PathRule::All => true,
            PathRule::MainOnly => path.is_main(),
            PathRule::ConversionOnly => path.is_conversion(),
            PathRule::NonConversion => !path.is_conversion(),
        }
    }
}

/// Rewrites an aggregated node value.
///
/// Transformations may read any stat through the context; those reads become
/// dependencies of the transformed node.
pub trait ValueTransformation: Send + Sync {
    fn transform(
        &self,
        value: Option<NodeValue>,
        context: &mut dyn CalculationContext,
    ) -> StatResult<Option<NodeValue>>;

    fn description(&self) -> String;
}

/// Multiplies a value by another stat's `Total`. An absent `Total` leaves the
/// value unchanged.
#[derive(Debug, Clone)]
pub struct MultiplyByStat {
    stat: Stat,
}

impl MultiplyByStat {
    pub fn new(stat: Stat) -> Self {
        Self { stat }
    }
}

impl ValueTransformation for MultiplyByStat {
    fn transform(
        &self,
        value: Option<NodeValue>,
        context: &mut dyn CalculationContext,
    ) -> StatResult<Option<NodeValue>> {
        let Some(value) = value else {
            return Ok(None);
        };
        match context.total(&self.stat)? {
            Some(factor) => Ok(Some(value * factor)),
            None => Ok(Some(value)),
        }
    }

    fn description(&self) -> String {
        format!("× {}", self.stat)
    }
}

/// A transformation backed by a closure.
pub struct FnTransformation<F> {
    f: F,
    description: String,
}

impl<F> FnTransformation<F>
where
    F: Fn(Option<NodeValue>, &mut dyn CalculationContext) -> StatResult<Option<NodeValue>>
        + Send
        + Sync,
{
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            f,
            description: description.into(),
        }
    }
}

impl<F> ValueTransformation for FnTransformation<F>
where
    F: Fn(Option<NodeValue>, &mut dyn CalculationContext) -> StatResult<Option<NodeValue>>
        + Send
        + Sync,
{
    fn transform(
        &self,
        value: Option<NodeValue>,
        context: &mut dyn CalculationContext,
    ) -> StatResult<Option<NodeValue>> {
        (self.f)(value, context)
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// A transformation rule selected by `(stat, node type, path rule)`.
///
/// # Examples
///
/// ```rust
/// use statgraph::{Behavior, Calculator, Modifier, MultiplyByStat, NodeType, PathRule, Stat};
///
/// let damage = Stat::new("Damage");
/// let multiplier = Stat::new("DamageMultiplier");
///
/// // While `Berserk` is in the graph, Damage's Total is multiplied by DamageMultiplier.
/// let berserk = Stat::new("Berserk").with_behavior(Behavior::new(
///     vec![damage.clone()],
///     vec![NodeType::Total],
///     PathRule::All,
///     MultiplyByStat::new(multiplier.clone()),
/// ));
///
/// let mut calculator = Calculator::new();
/// calculator.add_modifier(&Modifier::base_add(&damage, 10.0)).unwrap();
/// calculator.add_modifier(&Modifier::base_add(&multiplier, 3.0)).unwrap();
/// assert_eq!(calculator.total(&damage).unwrap(), Some(10.0.into()));
///
/// calculator.add_modifier(&Modifier::base_set(&berserk, 1.0)).unwrap();
/// assert_eq!(calculator.total(&damage).unwrap(), Some(30.0.into()));
/// ```
#[derive(Clone)]
pub struct Behavior {
    affected_stats: Vec<Stat>,
    affected_node_types: Vec<NodeType>,
    path_rule: PathRule,
    transformation: Arc<dyn ValueTransformation>,
}

impl Behavior {
    pub fn new(
        affected_stats: Vec<Stat>,
        affected_node_types: Vec<NodeType>,
        path_rule: PathRule,
        transformation: impl ValueTransformation + 'static,
    ) -> Self {
        Self {
            affected_stats,
            affected_node_types,
            path_rule,
            transformation: Arc::new(transformation),
        }
    }

    pub fn affected_stats(&self) -> &[Stat] {
        &self.affected_stats
    }

    pub fn affected_node_types(&self) -> &[NodeType] {
        &self.affected_node_types
    }

    pub fn path_rule(&self) -> PathRule {
        self.path_rule
    }

    pub fn transformation(&self) -> &Arc<dyn ValueTransformation> {
        &self.transformation
    }

    /// Whether the behavior applies to the node `(stat, node_type, path)`.
    pub fn applies_to(&self, stat: &Stat, node_type: NodeType, path: &PathDefinition) -> bool {
        self.affected_node_types.contains(&node_type)
            && self.path_rule.matches(path)
            && self.affected_stats.contains(stat)
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("affected_stats", &self.affected_stats)
            .field("affected_node_types", &self.affected_node_types)
            .field("path_rule", &self.path_rule)
            .field("transformation", &self.transformation.description())
            .finish()
    }
}

/// Behaviors currently in effect, grouped by the stat that owns them.
#[derive(Debug, Default)]
pub(crate) struct BehaviorRegistry {
    by_owner: IndexMap<Stat, Vec<Behavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the behaviors of `owner`. Returns the newly registered ones.
    pub fn register(&mut self, owner: &Stat) -> Vec<Behavior> {
        if owner.behaviors().is_empty() || self.by_owner.contains_key(owner) {
            return Vec::new();
        }
        let behaviors = owner.behaviors().to_vec();
        self.by_owner.insert(owner.clone(), behaviors.clone());
        behaviors
    }

    /// Unregister the behaviors of `owner`. Returns the removed ones.
    pub fn unregister(&mut self, owner: &Stat) -> Vec<Behavior> {
        self.by_owner.shift_remove(owner).unwrap_or_default()
    }

    /// Transformations for a node, in registration order.
    pub fn transformations_for(
        &self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> Vec<Arc<dyn ValueTransformation>> {
        self.by_owner
            .values()
            .flatten()
            .filter(|behavior| behavior.applies_to(stat, node_type, path))
            .map(|behavior| Arc::clone(&behavior.transformation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_owner.values().map(Vec::len).sum()
    }
}
