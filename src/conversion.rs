//! Conversion and gain registry.
//!
//! A conversion stat (`X.ConvertTo(Y)`) or gain stat (`X.GainAs(Y)`) with at
//! least one modifier links the source `X` to the target `Y`. While linked,
//! `Y` carries a converted path that receives a share of `X`'s main-path
//! base, and (for conversions only) `X`'s main path keeps what was not
//! converted away.

use crate::stat::{Stat, StatKind};
use crate::value::NodeValue;
use indexmap::IndexMap;

/// The conversion and gain stats linking one source to one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ConversionLink {
    pub conversion: Option<Stat>,
    pub gain: Option<Stat>,
}

impl ConversionLink {
    fn is_empty(&self) -> bool {
        self.conversion.is_none() && self.gain.is_none()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ConversionRegistry {
    links: IndexMap<Stat, IndexMap<Stat, ConversionLink>>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link the source and target of a conversion or gain stat.
    ///
    /// Returns `(source, target)`, or `None` for a regular stat.
    pub fn register(&mut self, stat: &Stat) -> Option<(Stat, Stat)> {
        let (source, target) = match stat.kind() {
            StatKind::Regular => return None,
            StatKind::Conversion { source, target } | StatKind::Gain { source, target } => {
                (source.clone(), target.clone())
            }
        };
        let link = self
            .links
            .entry(source.clone())
            .or_default()
            .entry(target.clone())
            .or_default();
        match stat.kind() {
            StatKind::Conversion { .. } => link.conversion = Some(stat.clone()),
            _ => link.gain = Some(stat.clone()),
        }
        Some((source, target))
    }

    /// Undo [`register`](Self::register).
    pub fn unregister(&mut self, stat: &Stat) -> Option<(Stat, Stat)> {
        let (source, target, is_conversion) = match stat.kind() {
            StatKind::Regular => return None,
            StatKind::Conversion { source, target } => (source.clone(), target.clone(), true),
            StatKind::Gain { source, target } => (source.clone(), target.clone(), false),
        };
        let targets = self.links.get_mut(&source)?;
        let link = targets.get_mut(&target)?;
        if is_conversion {
            link.conversion = None;
        } else {
            link.gain = None;
        }
        if link.is_empty() {
            targets.shift_remove(&target);
        }
        if targets.is_empty() {
            self.links.shift_remove(&source);
        }
        Some((source, target))
    }

    pub fn link(&self, source: &Stat, target: &Stat) -> Option<&ConversionLink> {
        self.links.get(source)?.get(target)
    }

    /// Targets `source` is converted or gained into, in registration order.
    pub fn targets(&self, source: &Stat) -> Vec<Stat> {
        self.links
            .get(source)
            .map(|targets| targets.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Sources that feed a converted path of `target`.
    pub fn sources_into(&self, target: &Stat) -> Vec<Stat> {
        self.links
            .iter()
            .filter(|(_, targets)| targets.contains_key(target))
            .map(|(source, _)| source.clone())
            .collect()
    }

    /// Conversion stats (not gains) of `source`.
    pub fn conversion_stats(&self, source: &Stat) -> Vec<Stat> {
        self.links
            .get(source)
            .map(|targets| {
                targets
                    .values()
                    .filter_map(|link| link.conversion.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any share of `source` is converted away.
    pub fn is_converted(&self, source: &Stat) -> bool {
        self.links
            .get(source)
            .is_some_and(|targets| targets.values().any(|link| link.conversion.is_some()))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// One conversion percentage of a source, scaled down proportionally when
/// all conversions of that source sum above 100%.
pub(crate) fn effective_conversion(conversion: NodeValue, sum: NodeValue) -> NodeValue {
    conversion.combine(sum, |c, s| if s > 100.0 { c * 100.0 / s } else { c })
}

/// Fraction of the source that stays on its own main path.
pub(crate) fn retained_fraction(sum: NodeValue) -> NodeValue {
    sum.map(|s| 1.0 - s.clamp(0.0, 100.0) / 100.0)
}
