//! Stat identity module.
//!
//! A `Stat` names one calculation subgraph. Its identity is the pair
//! `(name, entity)`; everything else (bounds, rounding, data type, behaviors)
//! is metadata consulted when the stat's graph is built. Stats share their
//! data through an `Arc`, so cloning is cheap and comparison only looks at the
//! identity.

use crate::behavior::Behavior;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The entity a stat belongs to.
///
/// `ModifierSource` and `Any` are placeholders: a collaborator must bind them
/// with [`Stat::resolve`] before the stat can enter the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Entity {
    Character,
    Enemy,
    Totem,
    Minion,
    /// The entity the modifier comes from, bound by the collaborator.
    ModifierSource,
    /// Any entity, bound by the collaborator.
    Any,
}

impl Entity {
    /// Whether this entity names something concrete.
    pub fn is_resolved(self) -> bool {
        !matches!(self, Entity::ModifierSource | Entity::Any)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a stat's `Total` is rounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rounding {
    #[default]
    None,
    Floor,
    Ceiling,
    Nearest,
}

/// The data type tag of a stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    Double,
    /// Integer stats are floored unless a rounding rule is given.
    Int,
    /// Boolean stats normalize their `Total` to `1`/`0`.
    Bool,
    /// Enum stats hold a variant index in `0..variants`.
    Enum { variants: u32 },
}

/// What role a stat plays in the graph.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum StatKind {
    Regular,
    /// Percentage of `source` converted to `target`.
    Conversion { source: Stat, target: Stat },
    /// Percentage of `source` gained as extra `target`.
    Gain { source: Stat, target: Stat },
}

#[derive(Clone)]
struct StatData {
    identity: Arc<str>,
    entity: Entity,
    kind: StatKind,
    minimum: Option<Stat>,
    maximum: Option<Stat>,
    rounding: Rounding,
    data_type: DataType,
    behaviors: Vec<Behavior>,
}

/// Identity and metadata of a calculated statistic.
///
/// # Examples
///
/// ```rust
/// use statgraph::{DataType, Entity, Rounding, Stat};
///
/// let life = Stat::new("Life").with_rounding(Rounding::Floor);
/// let enemy_life = Stat::new("Life").with_entity(Entity::Enemy);
///
/// // Identity is name + entity; metadata does not matter.
/// assert_eq!(life, Stat::new("Life"));
/// assert_ne!(life, enemy_life);
///
/// let frenzy = Stat::new("FrenzyCharges").with_data_type(DataType::Int);
/// assert_eq!(frenzy.data_type(), DataType::Int);
/// ```
#[derive(Clone)]
pub struct Stat(Arc<StatData>);

impl Stat {
    /// Create a regular stat owned by the character.
    pub fn new(identity: impl AsRef<str>) -> Self {
        Self(Arc::new(StatData {
            identity: Arc::from(identity.as_ref()),
            entity: Entity::Character,
            kind: StatKind::Regular,
            minimum: None,
            maximum: None,
            rounding: Rounding::None,
            data_type: DataType::Double,
            behaviors: Vec::new(),
        }))
    }

    /// The stat holding the percentage of `source` converted to `target`.
    ///
    /// Modifiers on this stat make the graph create a converted path beneath
    /// `target`.
    pub fn conversion(source: &Stat, target: &Stat) -> Self {
        let mut stat = Self::new(format!(
            "{}.ConvertTo({})",
            source.identity(),
            target.identity()
        ))
        .with_entity(source.entity());
        Arc::make_mut(&mut stat.0).kind = StatKind::Conversion {
            source: source.clone(),
            target: target.clone(),
        };
        stat
    }

    /// The stat holding the percentage of `source` gained as extra `target`.
    pub fn gain(source: &Stat, target: &Stat) -> Self {
        let mut stat = Self::new(format!(
            "{}.GainAs({})",
            source.identity(),
            target.identity()
        ))
        .with_entity(source.entity());
        Arc::make_mut(&mut stat.0).kind = StatKind::Gain {
            source: source.clone(),
            target: target.clone(),
        };
        stat
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        Arc::make_mut(&mut self.0).entity = entity;
        self
    }

    /// Bound the stat's `Subtotal` from below by another stat's `Total`.
    pub fn with_minimum(mut self, minimum: Stat) -> Self {
        Arc::make_mut(&mut self.0).minimum = Some(minimum);
        self
    }

    /// Bound the stat's `Subtotal` from above by another stat's `Total`.
    pub fn with_maximum(mut self, maximum: Stat) -> Self {
        Arc::make_mut(&mut self.0).maximum = Some(maximum);
        self
    }

    pub fn with_rounding(mut self, rounding: Rounding) -> Self {
        Arc::make_mut(&mut self.0).rounding = rounding;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        Arc::make_mut(&mut self.0).data_type = data_type;
        self
    }

    /// Attach a behavior that is registered when this stat enters the graph.
    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        Arc::make_mut(&mut self.0).behaviors.push(behavior);
        self
    }

    pub fn identity(&self) -> &str {
        &self.0.identity
    }

    pub fn entity(&self) -> Entity {
        self.0.entity
    }

    pub fn kind(&self) -> &StatKind {
        &self.0.kind
    }

    pub fn minimum(&self) -> Option<&Stat> {
        self.0.minimum.as_ref()
    }

    pub fn maximum(&self) -> Option<&Stat> {
        self.0.maximum.as_ref()
    }

    pub fn rounding(&self) -> Rounding {
        self.0.rounding
    }

    pub fn data_type(&self) -> DataType {
        self.0.data_type
    }

    pub fn behaviors(&self) -> &[Behavior] {
        &self.0.behaviors
    }

    /// The rounding applied to `Total`, taking the data type into account.
    pub fn effective_rounding(&self) -> Rounding {
        match (self.0.rounding, self.0.data_type) {
            (Rounding::None, DataType::Int | DataType::Enum { .. }) => Rounding::Floor,
            (rounding, _) => rounding,
        }
    }

    /// Whether this stat and every stat it refers to are bound to concrete
    /// entities.
    pub fn is_resolved(&self) -> bool {
        let bounds_resolved = self.minimum().map_or(true, Stat::is_resolved)
            && self.maximum().map_or(true, Stat::is_resolved);
        let kind_resolved = match self.kind() {
            StatKind::Regular => true,
            StatKind::Conversion { source, target } | StatKind::Gain { source, target } => {
                source.is_resolved() && target.is_resolved()
            }
        };
        self.entity().is_resolved() && bounds_resolved && kind_resolved
    }

    /// Bind placeholder entities (here and in referenced stats) to `entity`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use statgraph::{Entity, Stat};
    ///
    /// let unbound = Stat::new("Life").with_entity(Entity::ModifierSource);
    /// assert!(!unbound.is_resolved());
    ///
    /// let bound = unbound.resolve(Entity::Totem);
    /// assert_eq!(bound.entity(), Entity::Totem);
    /// assert!(bound.is_resolved());
    /// ```
    pub fn resolve(&self, entity: Entity) -> Stat {
        if self.is_resolved() {
            return self.clone();
        }
        let mut data = (*self.0).clone();
        if !data.entity.is_resolved() {
            data.entity = entity;
        }
        data.minimum = data.minimum.map(|s| s.resolve(entity));
        data.maximum = data.maximum.map(|s| s.resolve(entity));
        data.kind = match data.kind {
            StatKind::Regular => StatKind::Regular,
            StatKind::Conversion { source, target } => StatKind::Conversion {
                source: source.resolve(entity),
                target: target.resolve(entity),
            },
            StatKind::Gain { source, target } => StatKind::Gain {
                source: source.resolve(entity),
                target: target.resolve(entity),
            },
        };
        Stat(Arc::new(data))
    }
}

impl PartialEq for Stat {
    fn eq(&self, other: &Self) -> bool {
        self.0.identity == other.0.identity && self.0.entity == other.0.entity
    }
}

impl Eq for Stat {}

impl Hash for Stat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.identity.hash(state);
        self.0.entity.hash(state);
    }
}

impl PartialOrd for Stat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .identity
            .cmp(&other.0.identity)
            .then(self.0.entity.cmp(&other.0.entity))
    }
}

impl fmt::Debug for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stat")
            .field("identity", &self.identity())
            .field("entity", &self.entity())
            .finish()
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity() {
            Entity::Character => write!(f, "{}", self.identity()),
            entity => write!(f, "{}.{}", entity, self.identity()),
        }
    }
}

impl Serialize for Stat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
