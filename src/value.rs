//! Value primitive for the calculation graph.
//!
//! A node value is an `Option<NodeValue>`: `None` means "not applicable" and
//! `Some` carries a `(minimum, maximum)` pair. Scalars have equal bounds.
//! Arithmetic works component-wise, and absence propagates through the
//! `Option` helpers in this module unless a pipeline stage supplies its own
//! default.

use crate::error::{StatError, StatResult};
use crate::stat::Rounding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A single scalar or a `(minimum, maximum)` range.
///
/// # Examples
///
/// ```rust
/// use statgraph::NodeValue;
///
/// let flat = NodeValue::from(50.0);
/// let range = NodeValue::new(5.0, 10.0);
///
/// assert_eq!((flat + range), NodeValue::new(55.0, 60.0));
/// assert!(flat.is_true());
/// assert!(!NodeValue::from(0.0).is_true());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeValue {
    minimum: f64,
    maximum: f64,
}

impl NodeValue {
    /// Create a range value.
    pub fn new(minimum: f64, maximum: f64) -> Self {
        Self { minimum, maximum }
    }

    /// Create a scalar value.
    pub fn scalar(value: f64) -> Self {
        Self::new(value, value)
    }

    /// The boolean encoding used by conditions: `1` for true, `0` for false.
    pub fn from_bool(value: bool) -> Self {
        Self::scalar(if value { 1.0 } else { 0.0 })
    }

    pub fn minimum(self) -> f64 {
        self.minimum
    }

    pub fn maximum(self) -> f64 {
        self.maximum
    }

    /// Whether both bounds are equal.
    pub fn is_scalar(self) -> bool {
        self.minimum == self.maximum
    }

    /// Any non-zero bound makes the value true.
    pub fn is_true(self) -> bool {
        self.minimum != 0.0 || self.maximum != 0.0
    }

    /// Positional access to the bounds: `0` is the minimum, `1` the maximum.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use statgraph::{NodeValue, StatError};
    ///
    /// let value = NodeValue::new(2.0, 4.0);
    /// assert_eq!(value.component(1), Ok(4.0));
    /// assert_eq!(
    ///     value.component(2),
    ///     Err(StatError::IndexOutOfRange { index: 2, len: 2 })
    /// );
    /// ```
    pub fn component(self, index: usize) -> StatResult<f64> {
        match index {
            0 => Ok(self.minimum),
            1 => Ok(self.maximum),
            _ => Err(StatError::IndexOutOfRange { index, len: 2 }),
        }
    }

    /// Apply `f` to both bounds.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(f(self.minimum), f(self.maximum))
    }

    /// Combine both bounds with the bounds of `other`.
    pub fn combine(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self::new(f(self.minimum, other.minimum), f(self.maximum, other.maximum))
    }

    /// Clamp both bounds between the optional lower and upper values.
    ///
    /// A lower bound above the upper bound lets the upper bound win.
    pub fn clamp(self, lower: Option<NodeValue>, upper: Option<NodeValue>) -> Self {
        let mut value = self;
        if let Some(lower) = lower {
            value = value.combine(lower, f64::max);
        }
        if let Some(upper) = upper {
            value = value.combine(upper, f64::min);
        }
        value
    }

    /// Round both bounds with the given rule.
    pub fn round(self, rounding: Rounding) -> Self {
        match rounding {
            Rounding::None => self,
            Rounding::Floor => self.map(f64::floor),
            Rounding::Ceiling => self.map(f64::ceil),
            Rounding::Nearest => self.map(f64::round),
        }
    }

    /// Ordering used for "highest value wins" aggregation.
    pub(crate) fn total_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.minimum
            .total_cmp(&other.minimum)
            .then(self.maximum.total_cmp(&other.maximum))
    }
}

impl From<f64> for NodeValue {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl From<bool> for NodeValue {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

impl Add for NodeValue {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.combine(other, |a, b| a + b)
    }
}

impl Sub for NodeValue {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self.combine(other, |a, b| a - b)
    }
}

impl Mul for NodeValue {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        self.combine(other, |a, b| a * b)
    }
}

impl Div for NodeValue {
    type Output = Self;

    fn div(self, other: Self) -> Self {
        self.combine(other, |a, b| a / b)
    }
}

impl Add<f64> for NodeValue {
    type Output = Self;

    fn add(self, other: f64) -> Self {
        self.map(|a| a + other)
    }
}

impl Mul<f64> for NodeValue {
    type Output = Self;

    fn mul(self, other: f64) -> Self {
        self.map(|a| a * other)
    }
}

impl Neg for NodeValue {
    type Output = Self;

    fn neg(self) -> Self {
        self.map(|a| -a)
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            write!(f, "{}", self.minimum)
        } else {
            write!(f, "{} to {}", self.minimum, self.maximum)
        }
    }
}

/// Truthiness of an optional value; absence is false.
pub fn is_true(value: Option<NodeValue>) -> bool {
    value.is_some_and(NodeValue::is_true)
}

/// Sum of all present values, `None` if no value is present.
pub fn sum_present(values: impl IntoIterator<Item = Option<NodeValue>>) -> Option<NodeValue> {
    values
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<NodeValue>, v| Some(acc.map_or(v, |a| a + v)))
}

/// Product of all present values, `None` if no value is present.
pub fn product_present(
    values: impl IntoIterator<Item = Option<NodeValue>>,
) -> Option<NodeValue> {
    values
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<NodeValue>, v| Some(acc.map_or(v, |a| a * v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_arithmetic() {
        let a = NodeValue::from(10.0);
        let b = NodeValue::from(4.0);
        assert_eq!(a + b, NodeValue::from(14.0));
        assert_eq!(a - b, NodeValue::from(6.0));
        assert_eq!(a * b, NodeValue::from(40.0));
        assert_eq!(a / b, NodeValue::from(2.5));
        assert_eq!(-a, NodeValue::from(-10.0));
    }

    #[test]
    fn test_range_arithmetic() {
        let range = NodeValue::new(2.0, 6.0);
        assert_eq!(range * 2.0, NodeValue::new(4.0, 12.0));
        assert_eq!(range + 1.0, NodeValue::new(3.0, 7.0));
        assert!(!range.is_scalar());
    }

    #[test]
    fn test_truthiness() {
        assert!(NodeValue::from(true).is_true());
        assert!(!NodeValue::from(false).is_true());
        assert!(NodeValue::new(0.0, 1.0).is_true());
        assert!(!is_true(None));
        assert!(is_true(Some(NodeValue::from(-1.0))));
    }

    #[test]
    fn test_sum_present_ignores_absent() {
        let values = vec![Some(NodeValue::from(1.0)), None, Some(NodeValue::from(2.0))];
        assert_eq!(sum_present(values), Some(NodeValue::from(3.0)));
        assert_eq!(sum_present(vec![None, None]), None);
        assert_eq!(sum_present(Vec::new()), None);
    }

    #[test]
    fn test_product_present() {
        let values = vec![Some(NodeValue::from(1.5)), Some(NodeValue::from(2.0))];
        assert_eq!(product_present(values), Some(NodeValue::from(3.0)));
        assert_eq!(product_present(Vec::new()), None);
    }

    #[test]
    fn test_clamp() {
        let value = NodeValue::new(-5.0, 150.0);
        let clamped = value.clamp(Some(0.0.into()), Some(100.0.into()));
        assert_eq!(clamped, NodeValue::new(0.0, 100.0));
        assert_eq!(value.clamp(None, None), value);
    }

    #[test]
    fn test_rounding() {
        let value = NodeValue::new(1.4, 2.6);
        assert_eq!(value.round(Rounding::Floor), NodeValue::new(1.0, 2.0));
        assert_eq!(value.round(Rounding::Ceiling), NodeValue::new(2.0, 3.0));
        assert_eq!(value.round(Rounding::Nearest), NodeValue::new(1.0, 3.0));
        assert_eq!(value.round(Rounding::None), value);
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeValue::from(5.0).to_string(), "5");
        assert_eq!(NodeValue::new(1.0, 3.0).to_string(), "1 to 3");
    }
}
