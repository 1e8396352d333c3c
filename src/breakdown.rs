//! Stat breakdown module.
//!
//! A `StatBreakdown` is a read-only snapshot of how a stat's `Total` came to
//! be: the value of every path stage and every modifier contribution. It is
//! meant for debugging and tooltips and is serializable.

use crate::error::StatResult;
use crate::graph::{normalized, CalculationGraph};
use crate::modifier::ModifierId;
use crate::node::{Form, NodeType};
use crate::path::{ModifierSource, PathDefinition};
use crate::stat::Stat;
use crate::value::NodeValue;
use serde::Serialize;
use std::fmt;

/// One modifier's contribution to a stat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub modifier: ModifierId,
    pub form: Form,
    pub path: PathDefinition,
    pub source: ModifierSource,
    /// `None` when the modifier is inactive or its value is absent.
    pub value: Option<NodeValue>,
    pub description: String,
}

/// Stage values of one path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathBreakdown {
    pub path: PathDefinition,
    pub base: Option<NodeValue>,
    pub increase: Option<NodeValue>,
    pub more: Option<NodeValue>,
    pub total: Option<NodeValue>,
}

/// How a stat's total was computed.
///
/// # Examples
///
/// ```rust
/// use statgraph::{Calculator, Modifier, Stat};
///
/// let life = Stat::new("Life");
/// let mut calculator = Calculator::new();
/// calculator.add_modifier(&Modifier::base_add(&life, 50.0)).unwrap();
/// calculator.add_modifier(&Modifier::increase(&life, 20.0)).unwrap();
///
/// let breakdown = calculator.breakdown(&life).unwrap();
/// assert_eq!(breakdown.total, Some(60.0.into()));
/// assert_eq!(breakdown.paths.len(), 1);
/// assert_eq!(breakdown.contributions.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatBreakdown {
    pub stat: Stat,
    pub total: Option<NodeValue>,
    pub total_override: Option<NodeValue>,
    pub subtotal: Option<NodeValue>,
    pub paths: Vec<PathBreakdown>,
    /// Contributions in path order, then form order, then insertion order.
    pub contributions: Vec<Contribution>,
}

impl StatBreakdown {
    /// Contributions of one form.
    pub fn contributions_of(&self, form: Form) -> impl Iterator<Item = &Contribution> {
        self.contributions.iter().filter(move |c| c.form == form)
    }
}

impl fmt::Display for StatBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: Option<NodeValue>| match value {
            Some(value) => value.to_string(),
            None => String::from("-"),
        };
        writeln!(f, "{} = {}", self.stat, show(self.total))?;
        if self.total_override.is_some() {
            writeln!(f, "  override: {}", show(self.total_override))?;
        }
        for path in &self.paths {
            writeln!(
                f,
                "  [{}] base {} × inc {} × more {} = {}",
                path.path,
                show(path.base),
                show(path.increase),
                show(path.more),
                show(path.total)
            )?;
        }
        for contribution in &self.contributions {
            writeln!(
                f,
                "    {} {}: {}",
                contribution.path,
                contribution.description,
                show(contribution.value)
            )?;
        }
        Ok(())
    }
}

const FORMS: [Form; 5] = [
    Form::BaseSet,
    Form::BaseAdd,
    Form::Increase,
    Form::More,
    Form::TotalOverride,
];

impl CalculationGraph {
    pub(crate) fn breakdown(&mut self, stat: &Stat) -> StatResult<StatBreakdown> {
        let main = PathDefinition::main();
        let total = self.value(stat, NodeType::Total, &main)?;
        let total_override = self.value(stat, NodeType::TotalOverride, &main)?;
        let subtotal = self.value(stat, NodeType::Subtotal, &main)?;

        let mut paths = Vec::new();
        let mut contributions = Vec::new();
        for path in self.paths_of(stat) {
            paths.push(PathBreakdown {
                base: self.value(stat, NodeType::Base, &path)?,
                increase: self.value(stat, NodeType::Increase, &path)?,
                more: self.value(stat, NodeType::More, &path)?,
                total: self.value(stat, NodeType::PathTotal, &path)?,
                path: path.clone(),
            });

            for form in FORMS {
                let form_path = normalized(form.node_type(), &path);
                if form_path != path {
                    continue;
                }
                let members = self
                    .stats
                    .get(stat)
                    .map(|graph| graph.members(form, &form_path))
                    .unwrap_or_default();
                for id in members {
                    let value = self.modifier_value(id)?;
                    let Some(modifier) = self.modifier(id) else {
                        continue;
                    };
                    contributions.push(Contribution {
                        modifier: id,
                        form,
                        path: form_path.clone(),
                        source: modifier.source().clone(),
                        value,
                        description: modifier.description(),
                    });
                }
            }
        }

        Ok(StatBreakdown {
            stat: stat.clone(),
            total,
            total_override,
            subtotal,
            paths,
            contributions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::Modifier;

    #[test]
    fn test_breakdown_lists_paths_and_contributions() {
        let mut graph = CalculationGraph::new();
        let damage = Stat::new("Damage");
        let weapon = ModifierSource::local("Weapon");
        graph.add_modifier(&Modifier::base_add(&damage, 10.0)).unwrap();
        graph
            .add_modifier(&Modifier::base_add(&damage, 5.0).with_source(weapon.clone()))
            .unwrap();
        graph.add_modifier(&Modifier::more(&damage, 100.0)).unwrap();

        let breakdown = graph.breakdown(&damage).unwrap();
        // 10 × 2 on main, 5 × 2 on the weapon path (global More applies to both)
        assert_eq!(breakdown.total, Some(NodeValue::from(30.0)));
        assert_eq!(breakdown.paths.len(), 2);
        assert_eq!(breakdown.paths[1].path, weapon.path());
        assert_eq!(breakdown.paths[1].total, Some(NodeValue::from(10.0)));
        assert_eq!(breakdown.contributions.len(), 3);
        assert_eq!(breakdown.contributions_of(Form::More).count(), 1);
        assert_eq!(breakdown.contributions[2].source, weapon);
    }

    #[test]
    fn test_breakdown_display() {
        let mut graph = CalculationGraph::new();
        let mana = Stat::new("Mana");
        graph.add_modifier(&Modifier::base_add(&mana, 40.0)).unwrap();
        let text = graph.breakdown(&mana).unwrap().to_string();
        assert!(text.starts_with("Mana = 40"));
        assert!(text.contains("BaseAdd 40"));
    }

    #[test]
    fn test_breakdown_serializes() {
        let mut graph = CalculationGraph::new();
        let mana = Stat::new("Mana");
        graph.add_modifier(&Modifier::base_add(&mana, 40.0)).unwrap();
        let json = serde_json::to_value(graph.breakdown(&mana).unwrap()).unwrap();
        assert_eq!(json["stat"], "Mana");
        assert_eq!(json["total"]["minimum"], 40.0);
    }
}
