//! Typed feature values.
//!
//! Feature values are authored as literals tagged with a [`ValueType`].
//! Integer and Float literals are compared as arbitrary-precision decimals,
//! so `3` and `3.0` are the same value. String literals only ever compare for
//! equality and never coerce to or from numbers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ResolutionError, ResolutionResult};
use crate::ids::{FeatureId, FeatureValueId};

/// Scalar type of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Integer,
    Float,
    String,
}

impl ValueType {
    /// Returns true for Integer and Float.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Returns true if values of the two types may be compared.
///
/// ```
/// use kyroconf::value::{compatible, ValueType};
///
/// assert!(compatible(ValueType::Integer, ValueType::Float));
/// assert!(!compatible(ValueType::String, ValueType::Integer));
/// ```
#[must_use]
pub const fn compatible(a: ValueType, b: ValueType) -> bool {
    match (a, b) {
        (ValueType::String, ValueType::String) => true,
        (ValueType::String, _) | (_, ValueType::String) => false,
        _ => true,
    }
}

/// A legal value of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureValue {
    /// Value id, unique across the knowledge base.
    pub id: FeatureValueId,
    /// Owning feature.
    pub feature: FeatureId,
    /// Scalar type of the literal.
    pub value_type: ValueType,
    /// Literal as authored.
    pub value: String,
}

impl FeatureValue {
    /// Creates a feature value.
    #[must_use]
    pub fn new(
        id: impl Into<FeatureValueId>,
        feature: impl Into<FeatureId>,
        value_type: ValueType,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            feature: feature.into(),
            value_type,
            value: value.into(),
        }
    }

    /// Parses the literal as a decimal.
    ///
    /// Fails with `TypeMismatch` for String values.
    pub fn decimal(&self) -> ResolutionResult<Decimal> {
        if !self.value_type.is_numeric() {
            return Err(ResolutionError::TypeMismatch {
                left: self.describe(),
                right: "numeric".to_string(),
            });
        }
        parse_decimal(&self.value).ok_or_else(|| ResolutionError::InvalidDecision {
            reason: format!("feature value '{}' has a non-numeric literal '{}'", self.id, self.value),
        })
    }

    /// Returns true if `other` denotes the same value under coercion.
    pub fn same_value(&self, other: &Self) -> ResolutionResult<bool> {
        Ok(compare(self, other)? == Some(Ordering::Equal))
    }

    fn describe(&self) -> String {
        format!("{}({})", self.value_type, self.value)
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.feature, self.value)
    }
}

fn parse_decimal(literal: &str) -> Option<Decimal> {
    let literal = literal.trim();
    Decimal::from_str(literal)
        .or_else(|_| Decimal::from_scientific(literal))
        .ok()
}

/// Compares two numeric values by magnitude.
///
/// Fails with `TypeMismatch` if either side is a String.
pub fn compare_numeric(a: &FeatureValue, b: &FeatureValue) -> ResolutionResult<Ordering> {
    if !a.value_type.is_numeric() || !b.value_type.is_numeric() {
        return Err(ResolutionError::TypeMismatch {
            left: a.describe(),
            right: b.describe(),
        });
    }
    Ok(a.decimal()?.cmp(&b.decimal()?))
}

/// Compares two values.
///
/// Numeric values yield their ordering. String values yield `Some(Equal)`
/// when identical and `None` otherwise, since strings are never ordered.
/// Incompatible types fail with `TypeMismatch`.
pub fn compare(a: &FeatureValue, b: &FeatureValue) -> ResolutionResult<Option<Ordering>> {
    if !compatible(a.value_type, b.value_type) {
        return Err(ResolutionError::TypeMismatch {
            left: a.describe(),
            right: b.describe(),
        });
    }
    match a.value_type {
        ValueType::String => Ok((a.value == b.value).then_some(Ordering::Equal)),
        ValueType::Integer | ValueType::Float => compare_numeric(a, b).map(Some),
    }
}

fn range_error(feature: &FeatureId, reason: impl Into<String>) -> ResolutionError {
    ResolutionError::InvalidRange {
        feature: feature.to_string(),
        reason: reason.into(),
    }
}

/// Generates the values of a ranged feature, `min` to `max` inclusive.
///
/// `step` defaults to one and must be positive. Integer ranges require
/// integral bounds and step. More than `limit` values fail with
/// `InvalidRange`, as do `max < min` and String features.
///
/// ```
/// use kyroconf::value::{calculate_range, ValueType};
///
/// let values = calculate_range(&"doors".into(), ValueType::Integer, "1", "9", Some("2"), 500).unwrap();
/// let literals: Vec<_> = values.iter().map(|v| v.value.as_str()).collect();
/// assert_eq!(literals, ["1", "3", "5", "7", "9"]);
/// ```
pub fn calculate_range(
    feature: &FeatureId,
    value_type: ValueType,
    min: &str,
    max: &str,
    step: Option<&str>,
    limit: usize,
) -> ResolutionResult<Vec<FeatureValue>> {
    if !value_type.is_numeric() {
        return Err(range_error(feature, "string features cannot be ranged"));
    }

    let min_d = parse_decimal(min).ok_or_else(|| range_error(feature, format!("min '{min}' is not numeric")))?;
    let max_d = parse_decimal(max).ok_or_else(|| range_error(feature, format!("max '{max}' is not numeric")))?;
    let step_d = match step {
        Some(s) => parse_decimal(s).ok_or_else(|| range_error(feature, format!("step '{s}' is not numeric")))?,
        None => Decimal::ONE,
    };

    if step_d <= Decimal::ZERO {
        return Err(range_error(feature, format!("step {step_d} must be positive")));
    }
    if max_d < min_d {
        return Err(range_error(feature, format!("max {max_d} is below min {min_d}")));
    }
    if value_type == ValueType::Integer && [min_d, max_d, step_d].iter().any(|d| !d.fract().is_zero()) {
        return Err(range_error(feature, "integer ranges need integral bounds and step"));
    }

    let span = max_d
        .checked_sub(min_d)
        .and_then(|d| d.checked_div(step_d))
        .ok_or_else(|| range_error(feature, "range arithmetic overflowed"))?
        .floor();
    let count = span
        .checked_add(Decimal::ONE)
        .filter(|c| *c <= Decimal::from(limit))
        .ok_or_else(|| range_error(feature, format!("more than {limit} values")))?;

    let mut out = Vec::new();
    let mut current = min_d;
    let mut produced = Decimal::ZERO;
    while produced < count {
        let literal = current.normalize().to_string();
        out.push(FeatureValue {
            id: FeatureValueId::new(format!("{feature}={literal}")),
            feature: feature.clone(),
            value_type,
            value: literal,
        });
        produced += Decimal::ONE;
        current = current
            .checked_add(step_d)
            .ok_or_else(|| range_error(feature, "range arithmetic overflowed"))?;
    }
    Ok(out)
}
