//! Error types for the calculation graph.
//!
//! All errors that can occur while adding modifiers, reading values or
//! managing batches are represented by the `StatError` enum. Errors come in
//! two flavours:
//!
//! - **stage-local** errors (`MalformedCondition`, `ValueFunction`) only affect
//!   the contribution that produced them. The graph degrades that contribution
//!   to an absent value and keeps aggregating the rest.
//! - **structural** errors (everything else) are reported to the caller of the
//!   operation that triggered them.

use crate::events::SubscriptionId;
use crate::node::NodeKey;
use crate::stat::Stat;
use thiserror::Error;

/// Format a cycle path as a readable string.
fn format_cycle_path(path: &[NodeKey]) -> String {
    if path.is_empty() {
        return String::from("(empty cycle)");
    }
    path.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors that can occur in the calculation graph.
///
/// # Examples
///
/// ```rust
/// use statgraph::{Entity, Stat, StatError};
///
/// let stat = Stat::new("Life").with_entity(Entity::ModifierSource);
/// let err = StatError::UnresolvedReference(stat);
/// assert!(err.to_string().contains("Life"));
/// ```
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatError {
    /// A node was read while it was still being computed.
    ///
    /// Contains the keys of the nodes involved, starting and ending with the
    /// node that closed the loop.
    #[error("Cycle detected: {}", format_cycle_path(.path))]
    Cycle { path: Vec<NodeKey> },

    /// A stat still bound to a placeholder entity was used before resolution.
    #[error("Unresolved reference: {0} must be bound to a concrete entity")]
    UnresolvedReference(Stat),

    /// A condition evaluated to something that is not a boolean.
    #[error("Malformed condition: {0}")]
    MalformedCondition(String),

    /// A value function reported a failure.
    #[error("Value function failed: {0}")]
    ValueFunction(String),

    /// A positional reference was outside of the referenced sequence.
    #[error("Index {index} is out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// `unsubscribe` was called with an id that is not registered.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// An operation that requires a closed batch was called inside one.
    #[error("Operation requires all batches to be closed")]
    BatchOpen,

    /// `end_batch` was called without a matching `begin_batch`.
    #[error("end_batch called without a matching begin_batch")]
    UnbalancedBatch,
}

impl StatError {
    /// Whether this error only affects the contribution that raised it.
    pub fn is_stage_local(&self) -> bool {
        matches!(
            self,
            StatError::MalformedCondition(_) | StatError::ValueFunction(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type StatResult<T> = Result<T, StatError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;
    use crate::path::PathDefinition;

    #[test]
    fn test_error_display() {
        let err = StatError::UnresolvedReference(Stat::new("Life"));
        assert!(err.to_string().contains("Life"));
    }

    #[test]
    fn test_cycle_error_display() {
        let a = NodeKey::stat(Stat::new("A"), NodeType::Total, PathDefinition::main());
        let b = NodeKey::stat(Stat::new("B"), NodeType::Total, PathDefinition::main());
        let err = StatError::Cycle {
            path: vec![a.clone(), b, a],
        };
        let display = err.to_string();
        assert!(display.contains("Cycle detected"));
        assert!(display.contains("A.Total"));
        assert!(display.contains("B.Total"));
        assert!(display.contains(" -> "));
    }

    #[test]
    fn test_stage_local_classification() {
        assert!(StatError::MalformedCondition("x".into()).is_stage_local());
        assert!(StatError::ValueFunction("x".into()).is_stage_local());
        assert!(!StatError::BatchOpen.is_stage_local());
        assert!(!StatError::Cycle { path: Vec::new() }.is_stage_local());
    }
}
