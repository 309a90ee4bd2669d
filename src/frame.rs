//! Fixed-layout frames exchanged with the device.
//!
//! Every frame is a flat record: two header bytes, the mode byte, then one
//! slot per schema field at that field's wire width, little-endian throughout.
//! Nothing is tagged or length-prefixed, so slot order and widths are the
//! protocol. Changing the schema's field list changes the wire layout and must
//! come with a new [`PROTOCOL_VERSION`].

use thiserror::Error;

use crate::mode::{Mode, ModeSet};
use crate::schema::{Domain, EnumLiteral, ParameterSchema, WireType};
use crate::validate::{CanonicalParameterSet, ParamValue};

pub const PROTOCOL_VERSION: u16 = 1;

/// Slot order and widths of [`PROTOCOL_VERSION`], after the mode byte.
pub const WIRE_LAYOUT: [(&str, WireType); 22] = [
    ("LRL_ppm", WireType::U16),
    ("URL_ppm", WireType::U16),
    ("Reaction_Time_s", WireType::U16),
    ("Response_Factor", WireType::U16),
    ("W_Threshold", WireType::F64),
    ("J_Threshold", WireType::F64),
    ("R_Threshold", WireType::F64),
    ("Recovery_Time_min", WireType::U16),
    ("W_MSR_ppm", WireType::U16),
    ("J_MSR_ppm", WireType::U16),
    ("R_MSR_ppm", WireType::U16),
    ("W_Hysteresis", WireType::F64),
    ("J_Hysteresis", WireType::F64),
    ("R_Hysteresis", WireType::F64),
    ("A_Amp_V", WireType::F32),
    ("A_PW_ms", WireType::U16),
    ("ARP_ms", WireType::U16),
    ("A_Sens_mV", WireType::F32),
    ("V_Amp_V", WireType::F32),
    ("V_PW_ms", WireType::U16),
    ("VRP_ms", WireType::U16),
    ("V_Sens_mV", WireType::F32),
];

/// Rx(1): parameter command.
pub const CMD_PARAM: u8 = 0x00;
/// Rx(2) for SET_PARAM.
pub const SUBCMD_SET: u8 = 0x00;
/// Rx(2) for a read / egram-only request.
pub const SUBCMD_RECV_ONLY: u8 = 0x01;

pub const HEADER_LEN: usize = 2;
/// Mode byte plus every parameter slot.
pub const PAYLOAD_LEN: usize = 89;
pub const FRAME_LEN: usize = HEADER_LEN + PAYLOAD_LEN;
/// Two doubles: atrial then ventricular.
pub const EGRAM_LEN: usize = 16;
pub const RESPONSE_LEN: usize = PAYLOAD_LEN + EGRAM_LEN;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("response incomplete: expected {expected} bytes, got {actual}")]
    Incomplete { expected: usize, actual: usize },
    #[error("response too long: expected {expected} bytes, got {actual}")]
    Oversized { expected: usize, actual: usize },
    #[error("payload must be {expected} bytes, got {actual}")]
    PayloadLength { expected: usize, actual: usize },
    #[error("parameters were validated for {validated}, not {requested}")]
    ModeMismatch { validated: Mode, requested: Mode },
    #[error("parameter set has no value for '{0}'")]
    MissingField(String),
    #[error("unknown mode code {0}")]
    UnknownMode(u8),
}

/// A slot's value as it sits on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireValue {
    U8(u8),
    U16(u16),
    F32(f32),
    F64(f64),
}

impl WireValue {
    pub fn as_f64(self) -> f64 {
        match self {
            WireValue::U8(v) => v as f64,
            WireValue::U16(v) => v as f64,
            WireValue::F32(v) => v as f64,
            WireValue::F64(v) => v,
        }
    }
}

/// A SET payload read back slot by slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub mode: Mode,
    pub values: Vec<(String, WireValue)>,
}

impl DecodedPayload {
    pub fn get(&self, key: &str) -> Option<WireValue> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| *value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EgramSample {
    pub atrial: f64,
    pub ventricular: f64,
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The device's copy of the parameter region; not re-validated.
    pub echoed_payload: Vec<u8>,
    pub atrial_sample: f64,
    pub ventricular_sample: f64,
}

impl Response {
    pub fn sample(&self) -> EgramSample {
        EgramSample {
            atrial: self.atrial_sample,
            ventricular: self.ventricular_sample,
        }
    }

    /// Whether the echo is byte-for-byte the payload of `sent`.
    pub fn echo_matches(&self, sent: &[u8]) -> bool {
        sent.len() == FRAME_LEN && sent[HEADER_LEN..] == self.echoed_payload[..]
    }
}

#[derive(Debug, Clone)]
struct Slot {
    key: String,
    wire: WireType,
    modes: ModeSet,
    literals: Option<Vec<EnumLiteral>>,
}

impl Slot {
    fn number(&self, value: &ParamValue) -> f64 {
        match value {
            ParamValue::Code(code) => self
                .literals
                .iter()
                .flatten()
                .find(|l| &l.literal == code)
                .map_or(0.0, |l| l.wire_value),
            other => other.as_f64().unwrap_or(0.0),
        }
    }
}

/// Encoder/decoder bound to one schema's wire layout.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    slots: Vec<Slot>,
}

impl FrameCodec {
    pub fn new(schema: &ParameterSchema) -> Self {
        let slots = schema
            .fields()
            .iter()
            .map(|field| Slot {
                key: field.key.clone(),
                wire: field.wire,
                modes: field.modes,
                literals: match &field.domain {
                    Domain::Enumerated(literals) => Some(literals.clone()),
                    Domain::RangedSegments(_) => None,
                },
            })
            .collect();
        Self { slots }
    }

    /// Build the SET_PARAM frame. Slots inactive in `mode` are zero-filled.
    pub fn encode_set_params(
        &self,
        params: &CanonicalParameterSet,
        mode: Mode,
    ) -> Result<Vec<u8>, FrameError> {
        if params.mode() != mode {
            return Err(FrameError::ModeMismatch {
                validated: params.mode(),
                requested: mode,
            });
        }

        let mut frame = Vec::with_capacity(FRAME_LEN);
        frame.push(CMD_PARAM);
        frame.push(SUBCMD_SET);
        frame.push(mode.wire_code());
        for slot in &self.slots {
            if !slot.modes.contains(mode) {
                frame.resize(frame.len() + slot.wire.width(), 0);
                continue;
            }
            let value = params
                .get(&slot.key)
                .ok_or_else(|| FrameError::MissingField(slot.key.clone()))?;
            put(&mut frame, slot.wire, slot.number(value));
        }

        // The schema layout is checked at load; a mismatch here is a bug.
        assert_eq!(frame.len(), FRAME_LEN, "SET frame has the wrong length");
        Ok(frame)
    }

    /// Build the read-only frame: header, then a zero payload.
    pub fn encode_recv_only(&self) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[0] = CMD_PARAM;
        frame[1] = SUBCMD_RECV_ONLY;
        frame
    }

    pub fn decode_response(&self, raw: &[u8]) -> Result<Response, FrameError> {
        if raw.len() < RESPONSE_LEN {
            return Err(FrameError::Incomplete {
                expected: RESPONSE_LEN,
                actual: raw.len(),
            });
        }
        if raw.len() > RESPONSE_LEN {
            return Err(FrameError::Oversized {
                expected: RESPONSE_LEN,
                actual: raw.len(),
            });
        }
        let (echo, egram) = raw.split_at(PAYLOAD_LEN);
        Ok(Response {
            echoed_payload: echo.to_vec(),
            atrial_sample: read_f64(&egram[..8]),
            ventricular_sample: read_f64(&egram[8..]),
        })
    }

    /// Read a SET payload (everything after the header) back into slots.
    pub fn decode_payload(&self, payload: &[u8]) -> Result<DecodedPayload, FrameError> {
        if payload.len() != PAYLOAD_LEN {
            return Err(FrameError::PayloadLength {
                expected: PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let mode = Mode::from_wire_code(payload[0]).ok_or(FrameError::UnknownMode(payload[0]))?;
        let mut offset = 1;
        let mut values = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let bytes = &payload[offset..offset + slot.wire.width()];
            let value = match slot.wire {
                WireType::U8 => WireValue::U8(bytes[0]),
                WireType::U16 => WireValue::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
                WireType::F32 => {
                    WireValue::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                }
                WireType::F64 => WireValue::F64(read_f64(bytes)),
            };
            values.push((slot.key.clone(), value));
            offset += slot.wire.width();
        }
        Ok(DecodedPayload { mode, values })
    }
}

fn put(frame: &mut Vec<u8>, wire: WireType, number: f64) {
    match wire {
        WireType::U8 => frame.push(number as u8),
        WireType::U16 => frame.extend_from_slice(&(number as u16).to_le_bytes()),
        WireType::F32 => frame.extend_from_slice(&(number as f32).to_le_bytes()),
        WireType::F64 => frame.extend_from_slice(&number.to_le_bytes()),
    }
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    f64::from_le_bytes(buf)
}

/// `00 0A FF` style rendering for logs.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
