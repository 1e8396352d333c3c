//! Value functions module.
//!
//! A modifier's contribution is described by a `ValueFn`: a pure function of
//! a `CalculationContext`. Value functions can read any node of any stat
//! through the context; the graph records those reads as dependencies, so the
//! modifier's value is recomputed whenever one of them changes.

use crate::error::{StatError, StatResult};
use crate::node::NodeType;
use crate::path::PathDefinition;
use crate::stat::Stat;
use crate::value::NodeValue;
use std::sync::Arc;

/// Read access to the graph while a value is computed.
pub trait CalculationContext {
    /// The value of the node `(stat, node_type, path)`.
    fn value(
        &mut self,
        stat: &Stat,
        node_type: NodeType,
        path: &PathDefinition,
    ) -> StatResult<Option<NodeValue>>;

    /// Shorthand for a stat's `Total`.
    fn total(&mut self, stat: &Stat) -> StatResult<Option<NodeValue>> {
        self.value(stat, NodeType::Total, &PathDefinition::main())
    }
}

/// A function producing a modifier's value (or condition).
///
/// Value functions are stateless and deterministic. Failures that only
/// concern this value should be reported as `StatError::ValueFunction` or
/// `StatError::MalformedCondition`; the graph then treats the contribution as
/// absent.
///
/// # Examples
///
/// ```rust
/// use statgraph::{Constant, ValueFn};
///
/// let value = Constant::from(50.0);
/// assert_eq!(value.description(), "50");
/// ```
pub trait ValueFn: Send + Sync {
    fn calculate(&self, context: &mut dyn CalculationContext) -> StatResult<Option<NodeValue>>;

    /// Human-readable description, used in breakdowns and logs.
    fn description(&self) -> String;
}

/// A constant value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub Option<NodeValue>);

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Self(Some(NodeValue::from(value)))
    }
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Self(Some(NodeValue::from(value)))
    }
}

impl From<NodeValue> for Constant {
    fn from(value: NodeValue) -> Self {
        Self(Some(value))
    }
}

impl ValueFn for Constant {
    fn calculate(&self, _context: &mut dyn CalculationContext) -> StatResult<Option<NodeValue>> {
        Ok(self.0)
    }

    fn description(&self) -> String {
        match self.0 {
            Some(value) => value.to_string(),
            None => String::from("null"),
        }
    }
}

/// The value of another stat's node.
#[derive(Debug, Clone)]
pub struct StatReference {
    stat: Stat,
    node_type: NodeType,
    path: PathDefinition,
}

impl StatReference {
    /// Reference the `Total` of `stat`.
    pub fn total(stat: Stat) -> Self {
        Self::new(stat, NodeType::Total, PathDefinition::main())
    }

    pub fn new(stat: Stat, node_type: NodeType, path: PathDefinition) -> Self {
        Self {
            stat,
            node_type,
            path,
        }
    }
}

impl ValueFn for StatReference {
    fn calculate(&self, context: &mut dyn CalculationContext) -> StatResult<Option<NodeValue>> {
        context.value(&self.stat, self.node_type, &self.path)
    }

    fn description(&self) -> String {
        format!("{}.{}", self.stat, self.node_type)
    }
}

/// `amount` for every full `per` points of another stat's `Total`.
///
/// # Examples
///
/// ```rust
/// use statgraph::{Calculator, Form, Modifier, PerStat, Stat};
///
/// let strength = Stat::new("Strength");
/// let life = Stat::new("Life");
///
/// let mut calculator = Calculator::new();
/// calculator.add_modifier(&Modifier::base_add(&strength, 25.0)).unwrap();
/// calculator
///     .add_modifier(&Modifier::new(
///         vec![life.clone()],
///         Form::BaseAdd,
///         PerStat::new(strength, 10.0, 5.0),
///     ))
///     .unwrap();
///
/// // 25 strength → two full steps of 10 → 2 × 5
/// assert_eq!(calculator.total(&life).unwrap(), Some(10.0.into()));
/// ```
#[derive(Debug, Clone)]
pub struct PerStat {
    stat: Stat,
    per: f64,
    amount: f64,
}

impl PerStat {
    pub fn new(stat: Stat, per: f64, amount: f64) -> Self {
        Self { stat, per, amount }
    }
}

impl ValueFn for PerStat {
    fn calculate(&self, context: &mut dyn CalculationContext) -> StatResult<Option<NodeValue>> {
        if self.per == 0.0 {
            return Err(StatError::ValueFunction(format!(
                "per-stat step for {} is zero",
                self.stat
            )));
        }
        let per = self.per;
        let amount = self.amount;
        let total = context.total(&self.stat)?;
        Ok(Some(
            total
                .unwrap_or(NodeValue::from(0.0))
                .map(|v| (v / per).floor() * amount),
        ))
    }

    fn description(&self) -> String {
        format!("{} per {} {}", self.amount, self.per, self.stat)
    }
}

/// One bound of another value function's range (`0` = minimum, `1` = maximum).
pub struct RangeComponent {
    inner: Arc<dyn ValueFn>,
    index: usize,
}

impl RangeComponent {
    pub fn new(inner: impl ValueFn + 'static, index: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            index,
        }
    }
}

impl ValueFn for RangeComponent {
    fn calculate(&self, context: &mut dyn CalculationContext) -> StatResult<Option<NodeValue>> {
        match self.inner.calculate(context)? {
            Some(value) => Ok(Some(NodeValue::from(value.component(self.index)?))),
            None => Ok(None),
        }
    }

    fn description(&self) -> String {
        format!("{}[{}]", self.inner.description(), self.index)
    }
}

/// A value function backed by a closure.
///
/// # Examples
///
/// ```rust
/// use statgraph::FnValue;
///
/// let doubled_strength = FnValue::new("2 × Strength", |ctx| {
///     let strength = ctx.total(&statgraph::Stat::new("Strength"))?;
///     Ok(strength.map(|v| v * 2.0))
/// });
/// ```
pub struct FnValue<F> {
    f: F,
    description: String,
}

impl<F> FnValue<F>
where
    F: Fn(&mut dyn CalculationContext) -> StatResult<Option<NodeValue>> + Send + Sync,
{
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            f,
            description: description.into(),
        }
    }
}

impl<F> ValueFn for FnValue<F>
where
    F: Fn(&mut dyn CalculationContext) -> StatResult<Option<NodeValue>> + Send + Sync,
{
    fn calculate(&self, context: &mut dyn CalculationContext) -> StatResult<Option<NodeValue>> {
        (self.f)(context)
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Condition that holds while a stat's `Total` is true.
#[derive(Debug, Clone)]
pub struct StatCondition {
    stat: Stat,
}

impl StatCondition {
    pub fn new(stat: Stat) -> Self {
        Self { stat }
    }
}

impl ValueFn for StatCondition {
    fn calculate(&self, context: &mut dyn CalculationContext) -> StatResult<Option<NodeValue>> {
        let total = context.total(&self.stat)?;
        Ok(Some(NodeValue::from(crate::value::is_true(total))))
    }

    fn description(&self) -> String {
        format!("if {}", self.stat)
    }
}

/// Interpret a condition's value.
///
/// Absent means inactive; `0` and `1` scalars are booleans; anything else is a
/// `MalformedCondition`.
pub(crate) fn condition_holds(value: Option<NodeValue>, description: &str) -> StatResult<bool> {
    match value {
        None => Ok(false),
        Some(v) if v.is_scalar() && (v.minimum() == 0.0 || v.minimum() == 1.0) => Ok(v.is_true()),
        Some(v) => Err(StatError::MalformedCondition(format!(
            "condition `{}` evaluated to {} instead of a boolean",
            description, v
        ))),
    }
}
