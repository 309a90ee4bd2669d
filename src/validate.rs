//! Turns raw operator strings into a canonical, device-safe parameter set.
//!
//! Every problem is reported at once: coercion and domain errors accumulate
//! across all fields before anything is returned. Snapping to the increment
//! grid only happens once every field has passed, so an error is never masked
//! by a value that was already moved onto the grid.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::mode::Mode;
use crate::schema::{Domain, ParameterField, ParameterSchema, Segment, ValueType};

/// Operator input, keyed by parameter key.
pub type RawInputs = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Real(f64),
    /// An enumerated literal, kept exactly as the operator chose it.
    Code(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(value) => Some(*value as f64),
            ParamValue::Real(value) => Some(*value),
            ParamValue::Code(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Real(value) => write!(f, "{value}"),
            ParamValue::Code(code) => f.write_str(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("{0}: a value is required")]
    Missing(String),
    #[error("{0}: not a number")]
    NotANumber(String),
    #[error("{0}: '{1}' is not an allowed value")]
    NotAllowed(String, String),
    #[error("{key}: {value} is out of range, allowed {}", describe_segments(.segments))]
    OutOfRange {
        key: String,
        value: f64,
        segments: Vec<Segment>,
    },
    #[error("{0}")]
    CrossConstraint(String),
}

fn describe_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(Segment::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Coerce `raw` to `value_type`. Surrounding whitespace is ignored.
pub fn parse(key: &str, raw: &str, value_type: ValueType) -> Result<ParamValue, FieldError> {
    let text = raw.trim();
    let not_a_number = || FieldError::NotANumber(key.to_string());
    match value_type {
        ValueType::Integer => text
            .parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|_| not_a_number()),
        ValueType::Real => match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(ParamValue::Real(value)),
            _ => Err(not_a_number()),
        },
    }
}

/// Validated values for one mode, in wire order.
///
/// Only [`validate`] builds one, so holding a set means every field that
/// applies to its mode is present and legal.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalParameterSet {
    mode: Mode,
    values: Vec<(String, ParamValue)>,
}

impl CanonicalParameterSet {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Plain key→string map, suitable for a store and for re-validation.
    pub fn to_raw(&self) -> RawInputs {
        self.iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }
}

/// Raw defaults for every field active in `mode`.
pub fn default_inputs(schema: &ParameterSchema, mode: Mode) -> RawInputs {
    schema
        .fields_for_mode(mode)
        .filter_map(|field| {
            field
                .default
                .as_ref()
                .map(|default| (field.key.clone(), default.clone()))
        })
        .collect()
}

pub fn validate(
    schema: &ParameterSchema,
    raw: &RawInputs,
    mode: Mode,
) -> Result<CanonicalParameterSet, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut accepted: Vec<(&ParameterField, ParamValue)> = Vec::new();
    let mut numbers: HashMap<&str, f64> = HashMap::new();

    for field in schema.fields_for_mode(mode) {
        let supplied = if field.fixed {
            None
        } else {
            raw.get(&field.key).map(String::as_str)
        };
        let Some(text) = supplied.or(field.default.as_deref()) else {
            errors.push(FieldError::Missing(field.key.clone()));
            continue;
        };

        match &field.domain {
            Domain::Enumerated(_) => match field.domain.literal(text) {
                Some(literal) => {
                    accepted.push((field, ParamValue::Code(literal.literal.clone())));
                }
                None => errors.push(FieldError::NotAllowed(field.key.clone(), text.to_string())),
            },
            Domain::RangedSegments(segments) => {
                let value = match parse(&field.key, text, field.value_type) {
                    Ok(value) => value,
                    Err(err) => {
                        errors.push(err);
                        continue;
                    }
                };
                let Some(number) = value.as_f64() else {
                    continue;
                };
                numbers.insert(field.key.as_str(), number);
                if field.domain.segment_for(number).is_none() {
                    errors.push(FieldError::OutOfRange {
                        key: field.key.clone(),
                        value: number,
                        segments: segments.clone(),
                    });
                    continue;
                }
                accepted.push((field, value));
            }
        }
    }

    let mut snapped: HashMap<&str, f64> = HashMap::new();
    if errors.is_empty() {
        for (field, value) in accepted.iter_mut() {
            let field: &ParameterField = *field;
            *value = snap(field, value);
            if let Some(number) = value.as_f64() {
                snapped.insert(field.key.as_str(), number);
            }
        }
    }

    // Both the entered and the snapped pair must be ordered.
    for constraint in schema.ordering() {
        let violated = [&numbers, &snapped].iter().any(|values| {
            match (
                values.get(constraint.lower.as_str()),
                values.get(constraint.upper.as_str()),
            ) {
                (Some(lower), Some(upper)) => lower >= upper,
                _ => false,
            }
        });
        if violated {
            errors.push(FieldError::CrossConstraint(constraint.message.clone()));
        }
    }

    if !errors.is_empty() {
        log::debug!("{} rejected {} field(s)", mode, errors.len());
        return Err(errors);
    }

    Ok(CanonicalParameterSet {
        mode,
        values: accepted
            .into_iter()
            .map(|(field, value)| (field.key.clone(), value))
            .collect(),
    })
}

fn snap(field: &ParameterField, value: &ParamValue) -> ParamValue {
    let Some(number) = value.as_f64() else {
        return value.clone();
    };
    let Some(segment) = field.domain.segment_for(number) else {
        return value.clone();
    };
    match value {
        ParamValue::Int(_) => ParamValue::Int(segment.snap(number).round() as i64),
        ParamValue::Real(_) => ParamValue::Real(segment.snap(number)),
        ParamValue::Code(_) => value.clone(),
    }
}
