//! Modifier sources and path definitions.
//!
//! A stat's subgraph is split into paths. The main path collects global
//! modifiers; local sources (an item's own modifiers, for example) and
//! conversions each get a separate path whose totals are summed into the
//! stat's `UncappedSubtotal`.

use crate::stat::Stat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where a modifier comes from.
///
/// The source decides which path a modifier lands on and its priority when
/// several `BaseSet` modifiers compete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModifierSource {
    /// Applies to the stat as a whole.
    #[default]
    Global,
    /// Comes from a skill gem. Lands on the main path, wins `BaseSet` ties.
    Skill(Arc<str>),
    /// Local to one source (e.g. one weapon). Lands on its own path.
    Local(Arc<str>),
}

impl ModifierSource {
    pub fn skill(name: impl AsRef<str>) -> Self {
        ModifierSource::Skill(Arc::from(name.as_ref()))
    }

    pub fn local(name: impl AsRef<str>) -> Self {
        ModifierSource::Local(Arc::from(name.as_ref()))
    }

    /// Priority among competing `BaseSet` contributors. Higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            ModifierSource::Global => 0,
            ModifierSource::Local(_) => 1,
            ModifierSource::Skill(_) => 2,
        }
    }

    /// The path modifiers from this source are routed to.
    pub fn path(&self) -> PathDefinition {
        match self {
            ModifierSource::Global | ModifierSource::Skill(_) => PathDefinition::main(),
            ModifierSource::Local(_) => PathDefinition {
                source: self.clone(),
                conversion_stats: Vec::new(),
            },
        }
    }
}

impl fmt::Display for ModifierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModifierSource::Global => write!(f, "Global"),
            ModifierSource::Skill(name) => write!(f, "Skill({})", name),
            ModifierSource::Local(name) => write!(f, "Local({})", name),
        }
    }
}

/// One branch of a stat's subgraph.
///
/// # Examples
///
/// ```rust
/// use statgraph::{ModifierSource, PathDefinition, Stat};
///
/// assert!(PathDefinition::main().is_main());
///
/// let weapon = ModifierSource::local("Weapon");
/// assert!(!weapon.path().is_main());
///
/// let converted = PathDefinition::converted_from(Stat::new("PhysicalDamage"));
/// assert!(converted.is_conversion());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PathDefinition {
    pub source: ModifierSource,
    /// Stats whose values were converted into this path, outermost first.
    pub conversion_stats: Vec<Stat>,
}

impl PathDefinition {
    /// The path global modifiers live on.
    pub fn main() -> Self {
        Self::default()
    }

    /// The path holding the share of `source` converted into a stat.
    pub fn converted_from(source: Stat) -> Self {
        Self {
            source: ModifierSource::Global,
            conversion_stats: vec![source],
        }
    }

    pub fn is_main(&self) -> bool {
        self.source == ModifierSource::Global && self.conversion_stats.is_empty()
    }

    pub fn is_conversion(&self) -> bool {
        !self.conversion_stats.is_empty()
    }

    /// The stat converted into this path, if it is a direct conversion path.
    pub fn converted_stat(&self) -> Option<&Stat> {
        match self.conversion_stats.as_slice() {
            [stat] => Some(stat),
            _ => None,
        }
    }
}

impl fmt::Display for PathDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            return write!(f, "main");
        }
        write!(f, "{}", self.source)?;
        for stat in &self.conversion_stats {
            write!(f, " <- {}", stat)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_paths() {
        assert!(ModifierSource::Global.path().is_main());
        assert!(ModifierSource::skill("Fireball").path().is_main());
        let local = ModifierSource::local("Weapon").path();
        assert!(!local.is_main());
        assert!(!local.is_conversion());
    }

    #[test]
    fn test_priorities() {
        assert!(ModifierSource::skill("A").priority() > ModifierSource::local("B").priority());
        assert!(ModifierSource::local("B").priority() > ModifierSource::Global.priority());
    }

    #[test]
    fn test_conversion_path() {
        let physical = Stat::new("PhysicalDamage");
        let path = PathDefinition::converted_from(physical.clone());
        assert!(path.is_conversion());
        assert_eq!(path.converted_stat(), Some(&physical));
        assert_eq!(path.to_string(), "Global <- PhysicalDamage");
        assert_eq!(PathDefinition::main().converted_stat(), None);
    }

    #[test]
    fn test_display_main() {
        assert_eq!(PathDefinition::main().to_string(), "main");
        assert_eq!(ModifierSource::local("Ring").path().to_string(), "Local(Ring)");
    }
}
