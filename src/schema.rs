//! Declarative description of every programmable parameter.
//!
//! The schema is read once from a JSON document and checked completely at load
//! time: anything that would later produce an unsafe or ambiguous frame is a
//! [`SchemaError`] here rather than a surprise during validation. Field order
//! in the document is the order of the slots in a SET frame.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::frame::{PAYLOAD_LEN, PROTOCOL_VERSION, WIRE_LAYOUT};
use crate::mode::{Mode, ModeSet};
use crate::validate::parse;

/// Built-in schema matching the reference 91-byte device layout.
pub const STANDARD_SCHEMA: &str = include_str!("../config/params.json");

/// Tolerance used when counting grid steps in a segment.
const GRID_EPSILON: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed schema document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot read schema file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parameter '{0}' is defined more than once")]
    DuplicateKey(String),
    #[error("parameter '{0}' must define exactly one of 'segments' or 'allowed'")]
    AmbiguousDomain(String),
    #[error("parameter '{0}' has an empty domain")]
    EmptyDomain(String),
    #[error("parameter '{key}' has an invalid segment [{min},{max}] step {increment}")]
    InvalidSegment {
        key: String,
        min: f64,
        max: f64,
        increment: f64,
    },
    #[error("integer parameter '{0}' has a non-integral bound or increment")]
    NonIntegral(String),
    #[error("parameter '{key}' lists allowed value '{literal}' twice")]
    DuplicateLiteral { key: String, literal: String },
    #[error("unknown pacing mode '{name}' in {context}")]
    UnknownMode { context: String, name: String },
    #[error("parameter '{0}' applies to no pacing mode")]
    NoModes(String),
    #[error("parameter '{key}' cannot be carried as {wire:?} ({reason})")]
    WireMismatch {
        key: String,
        wire: WireType,
        reason: &'static str,
    },
    #[error("default '{default}' of parameter '{key}' is outside its domain")]
    DefaultRejected { key: String, default: String },
    #[error("fixed parameter '{0}' has no default value")]
    FixedWithoutDefault(String),
    #[error("ordering constraint refers to '{0}', which is not a ranged parameter")]
    UnknownConstraintKey(String),
    #[error("wire layout is {actual} payload bytes, the device expects {expected}")]
    LayoutLength { expected: usize, actual: usize },
    #[error("schema is for protocol v{actual}, this programmer speaks v{expected}")]
    VersionMismatch { expected: u16, actual: u16 },
    #[error("slot {slot} must be '{expected}' as {expected_wire:?}, found '{found}' as {found_wire:?}")]
    LayoutMismatch {
        slot: usize,
        expected: &'static str,
        expected_wire: WireType,
        found: String,
        found_wire: WireType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ValueType {
    #[serde(rename = "int", alias = "integer")]
    Integer,
    #[serde(rename = "float", alias = "real")]
    Real,
}

/// Width and encoding of a field's slot in the frame. Always little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    U8,
    U16,
    F32,
    F64,
}

impl WireType {
    pub fn width(self) -> usize {
        match self {
            WireType::U8 => 1,
            WireType::U16 => 2,
            WireType::F32 => 4,
            WireType::F64 => 8,
        }
    }
}

/// One `{min, max, increment}` run of legal values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub min: f64,
    pub max: f64,
    pub increment: f64,
}

impl Segment {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Index of the last grid point that does not exceed `max`.
    pub fn last_step(&self) -> u64 {
        ((self.max - self.min) / self.increment + GRID_EPSILON).floor() as u64
    }

    /// Decimal places the grid is expressed in.
    pub fn decimals(&self) -> u32 {
        decimals_of(self.min).max(decimals_of(self.increment))
    }

    /// Nearest grid point to `value`, never outside the segment.
    pub fn snap(&self, value: f64) -> f64 {
        let steps = ((value - self.min) / self.increment)
            .round()
            .clamp(0.0, self.last_step() as f64);
        self.point(steps as u64)
    }

    fn point(&self, step: u64) -> f64 {
        round_to(self.min + step as f64 * self.increment, self.decimals())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.min, self.max)
    }
}

/// An allowed literal and the number it puts on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumLiteral {
    pub literal: String,
    pub wire_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Enumerated(Vec<EnumLiteral>),
    RangedSegments(Vec<Segment>),
}

impl Domain {
    /// First segment holding `value`; `None` for enumerated domains.
    pub fn segment_for(&self, value: f64) -> Option<&Segment> {
        match self {
            Domain::RangedSegments(segments) => segments.iter().find(|s| s.contains(value)),
            Domain::Enumerated(_) => None,
        }
    }

    pub fn literal(&self, raw: &str) -> Option<&EnumLiteral> {
        match self {
            Domain::Enumerated(literals) => literals.iter().find(|l| l.literal == raw),
            Domain::RangedSegments(_) => None,
        }
    }

    /// Number of positions a slider bound to this domain has.
    pub fn grid_len(&self) -> usize {
        match self {
            Domain::Enumerated(literals) => literals.len(),
            Domain::RangedSegments(segments) => {
                segments.iter().map(|s| s.last_step() as usize + 1).sum()
            }
        }
    }

    /// Value at grid position `index`, walking segments in order.
    pub fn value_at(&self, index: usize) -> Option<f64> {
        match self {
            Domain::Enumerated(literals) => literals.get(index).map(|l| l.wire_value),
            Domain::RangedSegments(segments) => {
                let mut remaining = index as u64;
                for segment in segments {
                    let points = segment.last_step() + 1;
                    if remaining < points {
                        return Some(segment.point(remaining));
                    }
                    remaining -= points;
                }
                None
            }
        }
    }

    /// Grid position closest to `value`. Ties go to the earlier position.
    pub fn nearest_index(&self, value: f64) -> usize {
        let mut best = (0, f64::INFINITY);
        match self {
            Domain::Enumerated(literals) => {
                for (index, literal) in literals.iter().enumerate() {
                    let distance = (literal.wire_value - value).abs();
                    if distance < best.1 {
                        best = (index, distance);
                    }
                }
            }
            Domain::RangedSegments(segments) => {
                let mut offset = 0u64;
                for segment in segments {
                    let snapped = segment.snap(value);
                    let step = ((snapped - segment.min) / segment.increment).round() as u64;
                    let distance = (snapped - value).abs();
                    if distance < best.1 {
                        best = ((offset + step) as usize, distance);
                    }
                    offset += segment.last_step() + 1;
                }
            }
        }
        best.0
    }

    fn bounds(&self) -> (f64, f64) {
        let values: Vec<f64> = match self {
            Domain::Enumerated(literals) => literals.iter().map(|l| l.wire_value).collect(),
            Domain::RangedSegments(segments) => {
                segments.iter().flat_map(|s| [s.min, s.max]).collect()
            }
        };
        values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterField {
    pub key: String,
    pub label: String,
    pub unit: String,
    pub value_type: ValueType,
    pub domain: Domain,
    pub modes: ModeSet,
    pub wire: WireType,
    pub default: Option<String>,
    /// Carried for wire compatibility only; always sent as its default.
    pub fixed: bool,
}

impl ParameterField {
    pub fn applies_to(&self, mode: Mode) -> bool {
        self.modes.contains(mode)
    }

    /// Whether `raw` would pass this field's type and domain checks.
    pub fn admits(&self, raw: &str) -> bool {
        match &self.domain {
            Domain::Enumerated(_) => self.domain.literal(raw).is_some(),
            Domain::RangedSegments(_) => parse(&self.key, raw, self.value_type)
                .ok()
                .and_then(|value| value.as_f64())
                .map_or(false, |value| self.domain.segment_for(value).is_some()),
        }
    }
}

/// `lower < upper` between two ranged parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingConstraint {
    pub lower: String,
    pub upper: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    version: u16,
    modes: Vec<Mode>,
    fields: Vec<ParameterField>,
    ordering: Vec<OrderingConstraint>,
}

impl ParameterSchema {
    /// The built-in schema shipped with the programmer.
    pub fn standard() -> Result<Self, SchemaError> {
        Self::from_json_str(STANDARD_SCHEMA)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let text = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let schema = Self::from_json_str(&text)?;
        log::info!(
            "loaded parameter schema v{} from {} ({} fields)",
            schema.version,
            path.display(),
            schema.fields.len()
        );
        Ok(schema)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_json::from_str(text)?;
        let schema = raw.into_schema()?;
        schema.check_wire_layout()?;
        Ok(schema)
    }

    /// Loads a document without pinning it to the device's slot order.
    #[cfg(test)]
    pub(crate) fn from_json_str_unpinned(text: &str) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_json::from_str(text)?;
        raw.into_schema()
    }

    // Same-width fields can be reordered without changing the payload length,
    // so the slot sequence itself is compared.
    fn check_wire_layout(&self) -> Result<(), SchemaError> {
        for (slot, (field, (expected, expected_wire))) in
            self.fields.iter().zip(WIRE_LAYOUT).enumerate()
        {
            if field.key != expected || field.wire != expected_wire {
                return Err(SchemaError::LayoutMismatch {
                    slot,
                    expected,
                    expected_wire,
                    found: field.key.clone(),
                    found_wire: field.wire,
                });
            }
        }
        if self.fields.len() != WIRE_LAYOUT.len() {
            return Err(SchemaError::LayoutLength {
                expected: PAYLOAD_LEN,
                actual: self.payload_len(),
            });
        }
        Ok(())
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn lookup(&self, key: &str) -> Option<&ParameterField> {
        self.fields.iter().find(|field| field.key == key)
    }

    /// Every field, in wire order.
    pub fn fields(&self) -> &[ParameterField] {
        &self.fields
    }

    /// Fields active in `mode`, in wire order.
    pub fn fields_for_mode(&self, mode: Mode) -> impl Iterator<Item = &ParameterField> {
        self.fields.iter().filter(move |field| field.applies_to(mode))
    }

    pub fn ordering(&self) -> &[OrderingConstraint] {
        &self.ordering
    }

    /// Payload bytes after the two header bytes: mode byte plus every slot.
    pub fn payload_len(&self) -> usize {
        1 + self.fields.iter().map(|f| f.wire.width()).sum::<usize>()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    #[serde(default = "RawSchema::default_version")]
    version: u16,
    modes: Vec<String>,
    fields: Vec<RawField>,
    #[serde(default)]
    ordering: Vec<RawOrdering>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawField {
    key: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    unit: String,
    #[serde(rename = "type")]
    value_type: ValueType,
    wire: WireType,
    segments: Option<Vec<RawSegment>>,
    allowed: Option<Vec<String>>,
    modes: Vec<String>,
    default: Option<RawDefault>,
    #[serde(default)]
    fixed: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSegment {
    min: f64,
    max: f64,
    #[serde(alias = "increment")]
    inc: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDefault {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOrdering {
    lower: String,
    upper: String,
    message: String,
}

impl RawSchema {
    fn default_version() -> u16 {
        PROTOCOL_VERSION
    }

    fn into_schema(self) -> Result<ParameterSchema, SchemaError> {
        if self.version != PROTOCOL_VERSION {
            return Err(SchemaError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: self.version,
            });
        }
        let modes = self
            .modes
            .iter()
            .map(|name| parse_mode(name, "mode list"))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());
        for raw in self.fields {
            if !seen.insert(raw.key.clone()) {
                return Err(SchemaError::DuplicateKey(raw.key));
            }
            fields.push(raw.into_field()?);
        }

        let mut ordering = Vec::with_capacity(self.ordering.len());
        for raw in self.ordering {
            for key in [&raw.lower, &raw.upper] {
                let ranged = fields.iter().any(|f| {
                    &f.key == key && matches!(f.domain, Domain::RangedSegments(_))
                });
                if !ranged {
                    return Err(SchemaError::UnknownConstraintKey(key.clone()));
                }
            }
            ordering.push(OrderingConstraint {
                lower: raw.lower,
                upper: raw.upper,
                message: raw.message,
            });
        }

        let schema = ParameterSchema {
            version: self.version,
            modes,
            fields,
            ordering,
        };
        if schema.payload_len() != PAYLOAD_LEN {
            return Err(SchemaError::LayoutLength {
                expected: PAYLOAD_LEN,
                actual: schema.payload_len(),
            });
        }
        Ok(schema)
    }
}

impl RawField {
    fn into_field(self) -> Result<ParameterField, SchemaError> {
        let key = self.key;
        let domain = match (self.segments, self.allowed) {
            (Some(segments), None) => {
                Domain::RangedSegments(build_segments(&key, self.value_type, segments)?)
            }
            (None, Some(allowed)) => {
                Domain::Enumerated(build_literals(&key, self.value_type, allowed)?)
            }
            _ => return Err(SchemaError::AmbiguousDomain(key)),
        };
        check_wire(&key, self.wire, self.value_type, &domain)?;

        let modes = self
            .modes
            .iter()
            .map(|name| parse_mode(name, &format!("parameter '{key}'")))
            .collect::<Result<ModeSet, _>>()?;
        if modes.is_empty() {
            return Err(SchemaError::NoModes(key));
        }

        let default = self.default.map(|raw| match raw {
            RawDefault::Text(text) => text,
            RawDefault::Number(number) => number.to_string(),
        });
        if self.fixed && default.is_none() {
            return Err(SchemaError::FixedWithoutDefault(key));
        }

        let field = ParameterField {
            key,
            label: self.label,
            unit: self.unit,
            value_type: self.value_type,
            domain,
            modes,
            wire: self.wire,
            default,
            fixed: self.fixed,
        };
        if let Some(default) = &field.default {
            if !field.admits(default) {
                return Err(SchemaError::DefaultRejected {
                    key: field.key.clone(),
                    default: default.clone(),
                });
            }
        }
        Ok(field)
    }
}

fn parse_mode(name: &str, context: &str) -> Result<Mode, SchemaError> {
    name.parse().map_err(|_| SchemaError::UnknownMode {
        context: context.to_string(),
        name: name.to_string(),
    })
}

fn build_segments(
    key: &str,
    value_type: ValueType,
    raw: Vec<RawSegment>,
) -> Result<Vec<Segment>, SchemaError> {
    if raw.is_empty() {
        return Err(SchemaError::EmptyDomain(key.to_string()));
    }
    raw.into_iter()
        .map(|s| {
            let segment = Segment {
                min: s.min,
                max: s.max,
                increment: s.inc,
            };
            let finite = segment.min.is_finite()
                && segment.max.is_finite()
                && segment.increment.is_finite();
            if !finite || segment.min > segment.max || segment.increment <= 0.0 {
                return Err(SchemaError::InvalidSegment {
                    key: key.to_string(),
                    min: segment.min,
                    max: segment.max,
                    increment: segment.increment,
                });
            }
            if value_type == ValueType::Integer
                && [segment.min, segment.max, segment.increment]
                    .iter()
                    .any(|v| v.fract() != 0.0)
            {
                return Err(SchemaError::NonIntegral(key.to_string()));
            }
            Ok(segment)
        })
        .collect()
}

fn build_literals(
    key: &str,
    value_type: ValueType,
    allowed: Vec<String>,
) -> Result<Vec<EnumLiteral>, SchemaError> {
    if allowed.is_empty() {
        return Err(SchemaError::EmptyDomain(key.to_string()));
    }
    let mut literals: Vec<EnumLiteral> = Vec::with_capacity(allowed.len());
    for (ordinal, literal) in allowed.into_iter().enumerate() {
        if literals.iter().any(|l| l.literal == literal) {
            return Err(SchemaError::DuplicateLiteral {
                key: key.to_string(),
                literal,
            });
        }
        // Non-numeric codes travel as their position in the list.
        let wire_value = parse(key, &literal, value_type)
            .ok()
            .and_then(|value| value.as_f64())
            .unwrap_or(ordinal as f64);
        literals.push(EnumLiteral {
            literal,
            wire_value,
        });
    }
    Ok(literals)
}

fn check_wire(
    key: &str,
    wire: WireType,
    value_type: ValueType,
    domain: &Domain,
) -> Result<(), SchemaError> {
    let mismatch = |reason| SchemaError::WireMismatch {
        key: key.to_string(),
        wire,
        reason,
    };
    let (lo, hi) = domain.bounds();
    match wire {
        WireType::U8 | WireType::U16 => {
            if value_type != ValueType::Integer {
                return Err(mismatch("real values need a float slot"));
            }
            let limit = if wire == WireType::U8 {
                u8::MAX as f64
            } else {
                u16::MAX as f64
            };
            if lo < 0.0 || hi > limit {
                return Err(mismatch("domain exceeds the unsigned slot"));
            }
        }
        WireType::F32 | WireType::F64 => {
            if value_type != ValueType::Real {
                return Err(mismatch("integer values need an unsigned slot"));
            }
        }
    }
    Ok(())
}

fn decimals_of(value: f64) -> u32 {
    (0..=9)
        .find(|places| {
            let scaled = value * 10f64.powi(*places as i32);
            (scaled - scaled.round()).abs() < GRID_EPSILON * scaled.abs().max(1.0)
        })
        .unwrap_or(9)
}

pub(crate) fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(field: &str) -> String {
        format!(r#"{{ "modes": ["VVI"], "fields": [{field}] }}"#)
    }

    #[test]
    fn standard_schema_loads() {
        let schema = ParameterSchema::standard().unwrap();
        assert_eq!(schema.fields().len(), 22);
        assert_eq!(schema.payload_len(), PAYLOAD_LEN);
        assert_eq!(schema.modes().len(), 8);
        assert_eq!(schema.fields()[0].key, "LRL_ppm");
        assert_eq!(schema.fields()[21].key, "V_Sens_mV");
    }

    #[test]
    fn lookup_and_mode_filtering() {
        let schema = ParameterSchema::standard().unwrap();
        let lrl = schema.lookup("LRL_ppm").unwrap();
        assert_eq!(lrl.wire, WireType::U16);
        assert!(schema.lookup("Hysteresis_Rate").is_none());

        let vvi: Vec<&str> = schema
            .fields_for_mode(Mode::Vvi)
            .map(|f| f.key.as_str())
            .collect();
        assert_eq!(
            vvi,
            ["LRL_ppm", "URL_ppm", "V_Amp_V", "V_PW_ms", "VRP_ms", "V_Sens_mV"]
        );
        assert_eq!(schema.fields_for_mode(Mode::Aair).count(), 18);
    }

    #[test]
    fn segment_snaps_to_grid_and_stays_inside() {
        let segment = Segment { min: 50.0, max: 175.0, increment: 5.0 };
        assert_eq!(segment.snap(62.0), 60.0);
        assert_eq!(segment.snap(63.0), 65.0);
        assert_eq!(segment.snap(175.0), 175.0);

        let ragged = Segment { min: 0.0, max: 5.0, increment: 2.0 };
        assert_eq!(ragged.snap(4.9), 4.0);
        assert_eq!(ragged.snap(5.0), 4.0);

        let fine = Segment { min: 0.5, max: 3.2, increment: 0.1 };
        assert_eq!(fine.snap(1.2345), 1.2);
        assert_eq!(fine.snap(3.2), 3.2);
    }

    #[test]
    fn segment_formats_as_bracketed_range() {
        let segment = Segment { min: 30.0, max: 175.0, increment: 1.0 };
        assert_eq!(segment.to_string(), "[30,175]");
        let real = Segment { min: 0.5, max: 3.2, increment: 0.1 };
        assert_eq!(real.to_string(), "[0.5,3.2]");
    }

    #[test]
    fn grid_binding_round_trips() {
        let schema = ParameterSchema::standard().unwrap();
        let amp = &schema.lookup("A_Amp_V").unwrap().domain;
        // 0.5..=3.2 by 0.1 is 28 points, 3.5..=7.0 by 0.5 is 8 points.
        assert_eq!(amp.grid_len(), 36);
        assert_eq!(amp.value_at(0), Some(0.5));
        assert_eq!(amp.value_at(27), Some(3.2));
        assert_eq!(amp.value_at(28), Some(3.5));
        assert_eq!(amp.value_at(36), None);
        assert_eq!(amp.nearest_index(3.3), 27);
        assert_eq!(amp.nearest_index(3.45), 28);
        assert_eq!(amp.nearest_index(100.0), 35);

        let reaction = &schema.lookup("Reaction_Time_s").unwrap().domain;
        assert_eq!(reaction.grid_len(), 5);
        assert_eq!(reaction.nearest_index(33.0), 2);
        assert_eq!(reaction.value_at(4), Some(50.0));
    }

    #[test]
    fn enumerated_literals_carry_wire_values() {
        let json = minimal(
            r#"{ "key": "Activity", "type": "int", "wire": "u8",
                 "allowed": ["Low", "Med", "High"], "modes": ["VVI"] }"#,
        );
        let err = ParameterSchema::from_json_str(&json).unwrap_err();
        // Too short for the device layout, but the field itself was accepted.
        assert!(matches!(err, SchemaError::LayoutLength { actual: 2, .. }));

        let literals = build_literals(
            "Activity",
            ValueType::Integer,
            vec!["Low".into(), "7".into()],
        )
        .unwrap();
        assert_eq!(literals[0].wire_value, 0.0);
        assert_eq!(literals[1].wire_value, 7.0);
    }

    #[test]
    fn reject_non_positive_increment() {
        let json = minimal(
            r#"{ "key": "LRL_ppm", "type": "int", "wire": "u16",
                 "segments": [{ "min": 30, "max": 175, "inc": 0 }], "modes": ["VVI"] }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn reject_inverted_segment() {
        let json = minimal(
            r#"{ "key": "LRL_ppm", "type": "int", "wire": "u16",
                 "segments": [{ "min": 175, "max": 30, "inc": 1 }], "modes": ["VVI"] }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn reject_missing_required_keys() {
        let json = minimal(r#"{ "key": "LRL_ppm", "type": "int", "modes": ["VVI"] }"#);
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::Json(_))
        ));
        assert!(matches!(
            ParameterSchema::from_json_str(r#"{ "fields": [] }"#),
            Err(SchemaError::Json(_))
        ));
    }

    #[test]
    fn reject_duplicate_keys() {
        let field = r#"{ "key": "LRL_ppm", "type": "int", "wire": "u16",
                         "segments": [{ "min": 30, "max": 175, "inc": 1 }], "modes": ["VVI"] }"#;
        let json = minimal(&format!("{field}, {field}"));
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::DuplicateKey(key)) if key == "LRL_ppm"
        ));
    }

    #[test]
    fn reject_domain_with_both_kinds() {
        let json = minimal(
            r#"{ "key": "X", "type": "int", "wire": "u8", "allowed": ["1"],
                 "segments": [{ "min": 0, "max": 1, "inc": 1 }], "modes": ["VVI"] }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::AmbiguousDomain(_))
        ));
    }

    #[test]
    fn reject_wire_that_cannot_hold_domain() {
        let json = minimal(
            r#"{ "key": "X", "type": "int", "wire": "u8",
                 "segments": [{ "min": 0, "max": 300, "inc": 1 }], "modes": ["VVI"] }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::WireMismatch { .. })
        ));
        let json = minimal(
            r#"{ "key": "X", "type": "float", "wire": "u16",
                 "segments": [{ "min": 0, "max": 3, "inc": 0.5 }], "modes": ["VVI"] }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::WireMismatch { .. })
        ));
    }

    #[test]
    fn reject_fractional_integer_grid() {
        let json = minimal(
            r#"{ "key": "X", "type": "int", "wire": "u16",
                 "segments": [{ "min": 0, "max": 3, "inc": 0.5 }], "modes": ["VVI"] }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::NonIntegral(_))
        ));
    }

    #[test]
    fn reject_default_outside_domain() {
        let json = minimal(
            r#"{ "key": "X", "type": "int", "wire": "u16",
                 "segments": [{ "min": 30, "max": 175, "inc": 1 }], "modes": ["VVI"],
                 "default": 20 }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::DefaultRejected { .. })
        ));
    }

    #[test]
    fn reject_fixed_field_without_default() {
        let json = minimal(
            r#"{ "key": "X", "type": "float", "wire": "f64", "fixed": true,
                 "segments": [{ "min": 0, "max": 5, "inc": 0.25 }], "modes": ["VVI"] }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::FixedWithoutDefault(_))
        ));
    }

    #[test]
    fn reject_unknown_mode_names() {
        let json = minimal(
            r#"{ "key": "X", "type": "int", "wire": "u16",
                 "segments": [{ "min": 0, "max": 5, "inc": 1 }], "modes": ["DDD"] }"#,
        );
        assert!(matches!(
            ParameterSchema::from_json_str(&json),
            Err(SchemaError::UnknownMode { .. })
        ));
    }

    fn standard_document() -> serde_json::Value {
        serde_json::from_str(STANDARD_SCHEMA).unwrap()
    }

    #[test]
    fn reject_other_protocol_version() {
        let mut doc = standard_document();
        doc["version"] = serde_json::json!(9);
        assert!(matches!(
            ParameterSchema::from_json_str(&doc.to_string()),
            Err(SchemaError::VersionMismatch { expected: 1, actual: 9 })
        ));
    }

    #[test]
    fn reject_reordered_slots_of_equal_width() {
        let mut doc = standard_document();
        let fields = doc["fields"].as_array_mut().unwrap();
        fields.swap(0, 1);
        let err = ParameterSchema::from_json_str(&doc.to_string()).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::LayoutMismatch { slot: 0, expected: "LRL_ppm", ref found, .. }
                if found == "URL_ppm"
        ));
    }

    #[test]
    fn standard_schema_speaks_current_protocol() {
        let schema = ParameterSchema::standard().unwrap();
        assert_eq!(schema.version(), PROTOCOL_VERSION);
        let layout: Vec<(&str, WireType)> = schema
            .fields()
            .iter()
            .map(|f| (f.key.as_str(), f.wire))
            .collect();
        assert_eq!(layout, WIRE_LAYOUT);
    }

    #[test]
    fn reject_constraint_on_unknown_key() {
        let json = r#"{ "modes": ["VVI"], "fields": [],
                        "ordering": [{ "lower": "LRL_ppm", "upper": "URL_ppm", "message": "m" }] }"#;
        assert!(matches!(
            ParameterSchema::from_json_str(json),
            Err(SchemaError::UnknownConstraintKey(key)) if key == "LRL_ppm"
        ));
    }
}
