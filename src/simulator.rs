//! # Simulated Pacemaker
//!
//! An in-process stand-in for the device. It accepts the same frames the
//! hardware does, keeps the last programmed parameter region, and answers
//! every request with that region followed by one synthetic egram sample.
//! It plugs into a [`DeviceSession`](crate::session::DeviceSession) as a
//! [`Transport`], so the whole programming path can run without hardware.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;

use crate::frame::{
    DecodedPayload, EgramSample, FrameCodec, FrameError, CMD_PARAM, FRAME_LEN, HEADER_LEN,
    PAYLOAD_LEN, SUBCMD_RECV_ONLY, SUBCMD_SET,
};
use crate::mode::Mode;
use crate::transport::{Transport, TransportError};

/// Time between consecutive egram samples.
const SAMPLE_PERIOD_MS: f64 = 1.0;

// Error types for frames the simulated device refuses.
#[derive(Debug, PartialEq, Error)]
pub enum SimulatorError {
    /// Frame is not exactly one request long.
    #[error("frame is {0} bytes, expected {FRAME_LEN}")]
    BadLength(usize),
    /// First header byte is not the parameter command.
    #[error("unknown command byte {0:#04x}")]
    UnknownCommand(u8),
    /// Second header byte names no known request.
    #[error("unknown subcommand {0:#04x}")]
    UnknownSubcommand(u8),
    /// SET payload could not be read back.
    #[error("rejected payload: {0}")]
    Payload(#[from] FrameError),
}

#[derive(Debug, PartialEq)]
enum Command {
    SetParams,
    RecvOnly,
}

pub struct SimulatedPacemaker {
    device_id: String,
    codec: FrameCodec,
    // Parameter region as last programmed; all zero until the first SET.
    programmed: Vec<u8>,
    settings: Option<DecodedPayload>,
    sample_index: u64,
    outbound: VecDeque<u8>,
    frames_received: u64,
}

impl SimulatedPacemaker {
    pub fn new(device_id: &str, codec: FrameCodec) -> Self {
        Self {
            device_id: device_id.to_string(),
            codec,
            programmed: vec![0; PAYLOAD_LEN],
            settings: None,
            sample_index: 0,
            outbound: VecDeque::new(),
            frames_received: 0,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn programmed_mode(&self) -> Option<Mode> {
        self.settings.as_ref().map(|settings| settings.mode)
    }

    pub fn settings(&self) -> Option<&DecodedPayload> {
        self.settings.as_ref()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    fn parse_command(&self, frame: &[u8]) -> Result<Command, SimulatorError> {
        if frame.len() != FRAME_LEN {
            return Err(SimulatorError::BadLength(frame.len()));
        }
        if frame[0] != CMD_PARAM {
            return Err(SimulatorError::UnknownCommand(frame[0]));
        }
        match frame[1] {
            SUBCMD_SET => Ok(Command::SetParams),
            SUBCMD_RECV_ONLY => Ok(Command::RecvOnly),
            other => Err(SimulatorError::UnknownSubcommand(other)),
        }
    }

    /// Processes one request frame and returns the response frame.
    pub fn process_frame(&mut self, frame: &[u8]) -> Result<Vec<u8>, SimulatorError> {
        let command = self.parse_command(frame)?;
        self.frames_received += 1;
        self.execute_command(command, &frame[HEADER_LEN..])
    }

    fn execute_command(
        &mut self,
        command: Command,
        payload: &[u8],
    ) -> Result<Vec<u8>, SimulatorError> {
        if command == Command::SetParams {
            let settings = self.codec.decode_payload(payload)?;
            log::info!("{} programmed for {}", self.device_id, settings.mode);
            self.programmed = payload.to_vec();
            self.settings = Some(settings);
        }

        let sample = self.next_sample();
        let mut response = self.programmed.clone();
        response.extend_from_slice(&sample.atrial.to_le_bytes());
        response.extend_from_slice(&sample.ventricular.to_le_bytes());
        Ok(response)
    }

    /// Square pacing pulses at the lower rate in the paced chamber.
    fn next_sample(&mut self) -> EgramSample {
        let t_ms = self.sample_index as f64 * SAMPLE_PERIOD_MS;
        self.sample_index += 1;

        let mut sample = EgramSample {
            atrial: 0.0,
            ventricular: 0.0,
        };
        let Some(settings) = &self.settings else {
            return sample;
        };
        let value = |key: &str| settings.get(key).map_or(0.0, |v| v.as_f64());

        let rate = value("LRL_ppm");
        if rate <= 0.0 {
            return sample;
        }
        let period_ms = 60_000.0 / rate;
        let (amplitude, width) = if settings.mode.paces_atrium() {
            (value("A_Amp_V"), value("A_PW_ms"))
        } else {
            (value("V_Amp_V"), value("V_PW_ms"))
        };
        if t_ms % period_ms < width {
            if settings.mode.paces_atrium() {
                sample.atrial = amplitude;
            } else {
                sample.ventricular = amplitude;
            }
        }
        sample
    }
}

impl Transport for SimulatedPacemaker {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self.process_frame(bytes) {
            Ok(response) => self.outbound.extend(response),
            // The hardware stays silent on frames it cannot use.
            Err(e) => log::warn!("{} ignored frame: {}", self.device_id, e),
        }
        Ok(())
    }

    fn read(&mut self, max_len: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let count = max_len.min(self.outbound.len());
        Ok(self.outbound.drain(..count).collect())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.outbound.clear();
        Ok(())
    }
}
