//! # statgraph - Incremental Stat Calculation Graph
//!
//! A calculation engine for RPG character statistics that provides:
//! - **Lazy** values (nothing is computed until it is read)
//! - **Incremental** updates (a change only invalidates what depends on it)
//! - **Batched** notifications (one delivery per node per batch)
//! - **Pruning** of subgraphs nobody observes any more
//!
//! ## Core Concepts
//!
//! ### Stat Pipeline
//!
//! Every stat is a pipeline of aggregation nodes, one chain per path:
//!
//! ```text
//! BaseSet ─┐
//! BaseAdd ─┴→ Base → Increase → More → PathTotal ─┐
//!          (one chain per path: main, local sources, │
//!           conversions from other stats)            ↓
//!   UncappedSubtotal → Subtotal (clamped) → TotalOverride? → Total
//! ```
//!
//! 1. **Modifiers** add contributions to the collections of a stage
//! 2. **Stages** aggregate their contributions (sum, product, override)
//! 3. **Total** is clamped between the stat's bounds and rounded
//!
//! ### Key Features
//!
//! - **Dependency tracking**: nodes record what they read while computing
//! - **Cycle detection**: a node reading itself reports the full cycle
//! - **Conversions**: a share of one stat becomes part of another
//! - **Behaviors**: stats can transform the nodes of other stats
//! - **Breakdowns**: every contribution to a total can be inspected
//!
//! ## Example
//!
//! ```rust
//! use statgraph::{Calculator, Modifier, ModifierSource, Stat};
//!
//! let damage = Stat::new("PhysicalDamage");
//! let mut calculator = Calculator::new();
//!
//! {
//!     let mut batch = calculator.batch();
//!     batch.add_modifier(&Modifier::base_add(&damage, 10.0)).unwrap();
//!     batch.add_modifier(&Modifier::increase(&damage, 50.0)).unwrap();
//!     // Local modifiers only affect their own path.
//!     let weapon = ModifierSource::local("Weapon");
//!     batch
//!         .add_modifier(&Modifier::base_add(&damage, 4.0).with_source(weapon))
//!         .unwrap();
//! }
//!
//! // 10 × 1.5 on the main path, 4 × 1.5 on the weapon path
//! assert_eq!(calculator.total(&damage).unwrap(), Some(21.0.into()));
//! ```
//!
//! ## Modules
//!
//! - [`calculator`] - The calculator and batches
//! - [`stat`] - Stat identity and metadata
//! - [`modifier`] - Modifiers
//! - [`value_fn`] - Value functions of modifiers
//! - [`behavior`] - Cross-stat transformations
//! - [`pruning`] - Pruning rules and reports
//! - [`breakdown`] - Inspection of computed totals
//! - [`error`] - Error types

pub mod behavior;
pub mod breakdown;
pub mod calculator;
pub mod collection;
pub mod config;
mod conversion;
pub mod error;
pub mod events;
mod graph;
pub mod modifier;
pub mod node;
pub mod path;
pub mod pruning;
pub mod stat;
mod stat_graph;
pub mod value;
pub mod value_fn;

// Re-export main types for convenience
pub use behavior::{Behavior, FnTransformation, MultiplyByStat, PathRule, ValueTransformation};
pub use breakdown::{Contribution, PathBreakdown, StatBreakdown};
pub use calculator::{Batch, Calculator};
pub use collection::{CollectionDelta, NodeCollection};
pub use config::CalculatorConfig;
pub use error::{StatError, StatResult};
pub use events::{CollectionChanged, SubscriptionId, ValueChanged};
pub use modifier::{Modifier, ModifierId};
pub use node::{Form, NodeKey, NodeType};
pub use path::{ModifierSource, PathDefinition};
pub use pruning::{DefaultPruneRules, PruneReport, PruneRules};
pub use stat::{DataType, Entity, Rounding, Stat, StatKind};
pub use value::NodeValue;
pub use value_fn::{
    CalculationContext, Constant, FnValue, PerStat, RangeComponent, StatCondition, StatReference,
    ValueFn,
};
