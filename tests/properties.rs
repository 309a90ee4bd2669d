use proptest::prelude::*;

use dcm::frame::{FrameError, WireValue, HEADER_LEN, RESPONSE_LEN, WIRE_LAYOUT};
use dcm::schema::{Domain, ParameterField, Segment, ValueType, WireType};
use dcm::validate::{default_inputs, FieldError, ParamValue};
use dcm::{validate, FrameCodec, Mode, ParameterSchema, RawInputs};

fn schema() -> ParameterSchema {
    ParameterSchema::standard().expect("built-in schema loads")
}

fn with(schema: &ParameterSchema, mode: Mode, pairs: &[(&str, String)]) -> RawInputs {
    let mut raw = default_inputs(schema, mode);
    for (key, value) in pairs {
        raw.insert(key.to_string(), value.clone());
    }
    raw
}

fn arb_mode() -> impl Strategy<Value = Mode> {
    prop::sample::select(Mode::ALL.to_vec())
}

fn arb_amplitude() -> impl Strategy<Value = f64> {
    prop_oneof![0.5f64..=3.2f64, 3.5f64..=7.0f64]
}

fn is_on_grid(value: f64, min: f64, increment: f64) -> bool {
    let steps = (value - min) / increment;
    (steps - steps.round()).abs() < 1e-6
}

/// Operator-editable fields with segment domains.
fn ranged_fields(schema: &ParameterSchema) -> Vec<(&ParameterField, &[Segment])> {
    schema
        .fields()
        .iter()
        .filter(|field| !field.fixed)
        .filter_map(|field| match &field.domain {
            Domain::RangedSegments(segments) => Some((field, segments.as_slice())),
            Domain::Enumerated(_) => None,
        })
        .collect()
}

fn first_mode(field: &ParameterField) -> Mode {
    field.modes.iter().next().expect("every field has a mode")
}

fn text_for(field: &ParameterField, value: f64) -> String {
    match field.value_type {
        ValueType::Integer => (value.round() as i64).to_string(),
        ValueType::Real => value.to_string(),
    }
}

fn outer_bounds(segments: &[Segment]) -> (f64, f64) {
    segments.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s.min), hi.max(s.max))
    })
}

/// Inputs in the field's first mode with `value`, and every ordering
/// partner pushed to the far end of its domain.
fn inputs_for(schema: &ParameterSchema, field: &ParameterField, value: String) -> RawInputs {
    let mut raw = default_inputs(schema, first_mode(field));
    for constraint in schema.ordering() {
        let (partner, use_max) = if constraint.lower == field.key {
            (&constraint.upper, true)
        } else if constraint.upper == field.key {
            (&constraint.lower, false)
        } else {
            continue;
        };
        let partner = schema.lookup(partner).expect("constraint keys exist");
        if let Domain::RangedSegments(segments) = &partner.domain {
            let (lo, hi) = outer_bounds(segments);
            let bound = if use_max { hi } else { lo };
            raw.insert(partner.key.clone(), text_for(partner, bound));
        }
    }
    raw.insert(field.key.clone(), value);
    raw
}

fn wire_value(wire: WireType, number: f64) -> WireValue {
    match wire {
        WireType::U8 => WireValue::U8(number as u8),
        WireType::U16 => WireValue::U16(number as u16),
        WireType::F32 => WireValue::F32(number as f32),
        WireType::F64 => WireValue::F64(number),
    }
}

fn expected_slot(field: &ParameterField, value: &ParamValue) -> WireValue {
    let number = match value {
        ParamValue::Code(code) => field
            .domain
            .literal(code)
            .map_or(f64::NAN, |literal| literal.wire_value),
        other => other.as_f64().unwrap_or(f64::NAN),
    };
    wire_value(field.wire, number)
}

proptest! {
    #[test]
    fn every_ranged_field_rejects_values_outside_its_segments(
        offset in 1u32..500,
        gap in 0.01f64..0.99,
    ) {
        let schema = schema();
        for (field, segments) in ranged_fields(&schema) {
            let (lo, hi) = outer_bounds(segments);
            let mut outside = vec![lo - offset as f64, hi + offset as f64];
            for pair in segments.windows(2) {
                let (end, start) = (pair[0].max, pair[1].min);
                if start > end {
                    outside.push(end + gap * (start - end));
                }
            }

            for value in outside {
                let text = text_for(field, value);
                let parsed: f64 = text.parse().unwrap();
                if field.domain.segment_for(parsed).is_some() {
                    // An integer gap value rounded back onto a segment.
                    continue;
                }
                let mode = first_mode(field);
                let raw = with(&schema, mode, &[(field.key.as_str(), text)]);
                let errors = validate(&schema, &raw, mode).unwrap_err();
                prop_assert!(
                    errors.iter().any(|e| matches!(
                        e,
                        FieldError::OutOfRange { key, .. } if key == &field.key
                    )),
                    "{} accepted {}",
                    field.key,
                    parsed
                );
            }
        }
    }

    #[test]
    fn every_ranged_field_snaps_onto_its_own_segment(position in 0.0f64..=1.0) {
        let schema = schema();
        for (field, segments) in ranged_fields(&schema) {
            for segment in segments {
                let mut value = segment.min + position * (segment.max - segment.min);
                if field.value_type == ValueType::Integer {
                    value = value.round();
                }
                let mode = first_mode(field);
                let raw = inputs_for(&schema, field, text_for(field, value));

                match validate(&schema, &raw, mode) {
                    Ok(set) => {
                        let snapped = set.get(&field.key).and_then(|v| v.as_f64()).unwrap();
                        prop_assert!(segment.contains(snapped), "{} -> {}", value, snapped);
                        prop_assert!(is_on_grid(snapped, segment.min, segment.increment));
                        prop_assert!(
                            (snapped - value).abs() <= segment.increment / 2.0 + 1e-9,
                            "{}: {} moved to {}",
                            field.key,
                            value,
                            snapped
                        );
                    }
                    // Only the far end of an ordered pair may collide.
                    Err(errors) => {
                        prop_assert!(errors
                            .iter()
                            .all(|e| matches!(e, FieldError::CrossConstraint(_))));
                    }
                }
            }
        }
    }

    #[test]
    fn validation_is_idempotent(
        mode in arb_mode(),
        lrl in 30i64..=100,
        amp in arb_amplitude(),
        pw in 1i64..=30,
    ) {
        let schema = schema();
        let raw = with(&schema, mode, &[
            ("LRL_ppm", lrl.to_string()),
            ("A_Amp_V", amp.to_string()),
            ("V_Amp_V", amp.to_string()),
            ("A_PW_ms", pw.to_string()),
            ("V_PW_ms", pw.to_string()),
        ]);
        let once = validate(&schema, &raw, mode).unwrap();
        let twice = validate(&schema, &once.to_raw(), mode).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn rate_ordering_is_enforced(lrl in 30i64..=175, url in 50i64..=175) {
        let schema = schema();
        let raw = with(&schema, Mode::Vvi, &[
            ("LRL_ppm", lrl.to_string()),
            ("URL_ppm", url.to_string()),
        ]);
        let snapped_url = ((url - 50) as f64 / 5.0).round() as i64 * 5 + 50;
        let result = validate(&schema, &raw, Mode::Vvi);
        if lrl >= url || lrl >= snapped_url {
            let errors = result.unwrap_err();
            prop_assert!(errors.iter().any(|e| matches!(e, FieldError::CrossConstraint(_))));
        } else {
            let set = result.unwrap();
            prop_assert_eq!(set.get("URL_ppm"), Some(&ParamValue::Int(snapped_url)));
        }
    }

    #[test]
    fn every_active_slot_reads_back(
        mode in arb_mode(),
        picks in prop::collection::vec(0.0f64..1.0, WIRE_LAYOUT.len()),
    ) {
        let schema = schema();
        let codec = FrameCodec::new(&schema);

        let mut raw = default_inputs(&schema, mode);
        for (field, pick) in schema.fields().iter().zip(&picks) {
            if field.fixed || !field.applies_to(mode) {
                continue;
            }
            let text = match &field.domain {
                Domain::Enumerated(literals) => {
                    let index = ((pick * literals.len() as f64) as usize).min(literals.len() - 1);
                    literals[index].literal.clone()
                }
                Domain::RangedSegments(segments) => {
                    let scaled = pick * segments.len() as f64;
                    let segment = &segments[(scaled as usize).min(segments.len() - 1)];
                    let value = segment.min + scaled.fract() * (segment.max - segment.min);
                    text_for(field, value)
                }
            };
            raw.insert(field.key.clone(), text);
        }

        let result = validate(&schema, &raw, mode);
        // Random rate limits are often inverted.
        prop_assume!(result.is_ok());
        let set = result.unwrap();
        let frame = codec.encode_set_params(&set, mode).unwrap();
        let decoded = codec.decode_payload(&frame[HEADER_LEN..]).unwrap();

        prop_assert_eq!(decoded.mode, mode);
        for field in schema.fields() {
            let expected = match set.get(&field.key) {
                Some(value) => expected_slot(field, value),
                None => wire_value(field.wire, 0.0),
            };
            prop_assert_eq!(decoded.get(&field.key), Some(expected), "slot {}", field.key);
        }
    }

    #[test]
    fn short_responses_are_incomplete(len in 0usize..RESPONSE_LEN) {
        let codec = FrameCodec::new(&schema());
        let raw = vec![0u8; len];
        prop_assert_eq!(
            codec.decode_response(&raw),
            Err(FrameError::Incomplete { expected: RESPONSE_LEN, actual: len })
        );
    }

    #[test]
    fn grid_binding_lands_in_domain(index in 0usize..64, value in 0.0f64..200.0) {
        let schema = schema();
        for field in schema.fields() {
            let domain = &field.domain;
            let nearest = domain.nearest_index(value);
            prop_assert!(nearest < domain.grid_len());
            let bound = domain.value_at(nearest).unwrap();
            if let Domain::RangedSegments(segments) = domain {
                prop_assert!(segments.iter().any(|s| {
                    s.contains(bound) && is_on_grid(bound, s.min, s.increment)
                }), "bound {} not on any segment grid", bound);
            }

            if index < domain.grid_len() {
                let at = domain.value_at(index).unwrap();
                prop_assert_eq!(domain.nearest_index(at), index);
            } else {
                prop_assert!(domain.value_at(index).is_none());
            }
        }
    }
}
