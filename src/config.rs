//! Calculator configuration.

use serde::{Deserialize, Serialize};

/// Tunables of a [`Calculator`](crate::Calculator).
///
/// # Examples
///
/// ```rust
/// use statgraph::{Calculator, CalculatorConfig};
///
/// let config = CalculatorConfig {
///     prune_after_batch: false,
///     ..CalculatorConfig::default()
/// };
/// let calculator = Calculator::with_config(config);
/// assert!(!calculator.config().prune_after_batch);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorConfig {
    /// Run the pruner whenever the outermost batch closes.
    pub prune_after_batch: bool,
    /// Deliver collection deltas to collection subscribers.
    pub notify_collection_changes: bool,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            prune_after_batch: true,
            notify_collection_changes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CalculatorConfig::default();
        assert!(config.prune_after_batch);
        assert!(config.notify_collection_changes);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: CalculatorConfig =
            serde_json::from_str(r#"{ "prune_after_batch": false }"#).unwrap();
        assert!(!config.prune_after_batch);
        assert!(config.notify_collection_changes);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = CalculatorConfig {
            prune_after_batch: false,
            notify_collection_changes: false,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: CalculatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
