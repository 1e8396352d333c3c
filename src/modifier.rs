//! Modifier module.
//!
//! A `Modifier` is one structured contribution to one or more stats: a form
//! (how it aggregates), a value function, the source it comes from (which
//! decides its path) and an optional condition. Every modifier carries a
//! process-unique `ModifierId`; clones share it, which is what makes adding
//! and removing idempotent.

use crate::node::Form;
use crate::path::ModifierSource;
use crate::stat::Stat;
use crate::value_fn::{Constant, ValueFn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MODIFIER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique modifier identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModifierId(u64);

impl ModifierId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_MODIFIER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A structured contribution to one or more stats.
///
/// # Examples
///
/// ```rust
/// use statgraph::{Calculator, Modifier, ModifierSource, Stat};
///
/// let life = Stat::new("Life");
///
/// let flat = Modifier::base_add(&life, 50.0);
/// let increased = Modifier::increase(&life, 20.0).with_source(ModifierSource::skill("Vitality"));
///
/// let mut calculator = Calculator::new();
/// calculator.add_modifier(&flat).unwrap();
/// calculator.add_modifier(&increased).unwrap();
/// assert_eq!(calculator.total(&life).unwrap(), Some(60.0.into()));
///
/// // Clones share their id, so this is a no-op.
/// assert!(!calculator.add_modifier(&flat.clone()).unwrap());
/// ```
#[derive(Clone)]
pub struct Modifier {
    id: ModifierId,
    stats: Vec<Stat>,
    form: Form,
    value: Arc<dyn ValueFn>,
    source: ModifierSource,
    condition: Option<Arc<dyn ValueFn>>,
}

impl Modifier {
    /// Create a global modifier with a fresh id.
    pub fn new(stats: Vec<Stat>, form: Form, value: impl ValueFn + 'static) -> Self {
        Self {
            id: ModifierId::next(),
            stats,
            form,
            value: Arc::new(value),
            source: ModifierSource::Global,
            condition: None,
        }
    }

    pub fn base_set(stat: &Stat, value: f64) -> Self {
        Self::new(vec![stat.clone()], Form::BaseSet, Constant::from(value))
    }

    pub fn base_add(stat: &Stat, value: f64) -> Self {
        Self::new(vec![stat.clone()], Form::BaseAdd, Constant::from(value))
    }

    /// `value` percent increased.
    pub fn increase(stat: &Stat, value: f64) -> Self {
        Self::new(vec![stat.clone()], Form::Increase, Constant::from(value))
    }

    /// `value` percent more.
    pub fn more(stat: &Stat, value: f64) -> Self {
        Self::new(vec![stat.clone()], Form::More, Constant::from(value))
    }

    pub fn total_override(stat: &Stat, value: f64) -> Self {
        Self::new(vec![stat.clone()], Form::TotalOverride, Constant::from(value))
    }

    /// `percent` of `source` converted to `target`.
    pub fn conversion(source: &Stat, target: &Stat, percent: f64) -> Self {
        Self::base_add(&Stat::conversion(source, target), percent)
    }

    /// `percent` of `source` gained as extra `target`.
    pub fn gain(source: &Stat, target: &Stat, percent: f64) -> Self {
        Self::base_add(&Stat::gain(source, target), percent)
    }

    pub fn with_source(mut self, source: ModifierSource) -> Self {
        self.source = source;
        self
    }

    /// Only contribute while `condition` evaluates to true.
    pub fn with_condition(mut self, condition: impl ValueFn + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn id(&self) -> ModifierId {
        self.id
    }

    pub fn stats(&self) -> &[Stat] {
        &self.stats
    }

    pub fn form(&self) -> Form {
        self.form
    }

    pub fn value(&self) -> &Arc<dyn ValueFn> {
        &self.value
    }

    pub fn source(&self) -> &ModifierSource {
        &self.source
    }

    pub fn condition(&self) -> Option<&Arc<dyn ValueFn>> {
        self.condition.as_ref()
    }

    pub fn description(&self) -> String {
        match &self.condition {
            Some(condition) => format!(
                "{} {} ({})",
                self.form,
                self.value.description(),
                condition.description()
            ),
            None => format!("{} {}", self.form, self.value.description()),
        }
    }
}

impl fmt::Debug for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modifier")
            .field("id", &self.id)
            .field("stats", &self.stats)
            .field("form", &self.form)
            .field("value", &self.value.description())
            .field("source", &self.source)
            .field(
                "condition",
                &self.condition.as_ref().map(|c| c.description()),
            )
            .finish()
    }
}
