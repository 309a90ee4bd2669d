//! # Device Session
//!
//! A [`DeviceSession`] owns at most one open [`Transport`] and tracks which
//! device is attached. Every request is a single exchange: clear stale input,
//! write the frame, then read until a full response arrives or the deadline
//! passes. Nothing here retries or reconnects on its own; callers opt in
//! through [`RetryPolicy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::frame::{
    hex_dump, EgramSample, FrameCodec, FrameError, Response, HEADER_LEN, RESPONSE_LEN,
};
use crate::transport::{Transport, TransportError};
use crate::validate::CanonicalParameterSet;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// What changed when a device identified itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First device seen by this session.
    Connected(String),
    DeviceChanged { previous: String, current: String },
    /// The last known device came back.
    Reconnected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected(String),
}

#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    current: Option<String>,
    last_known: Option<String>,
}

impl DeviceIdentity {
    pub fn set(&mut self, device_id: &str) -> ConnectionEvent {
        let event = match self.last_known.as_deref() {
            None => ConnectionEvent::Connected(device_id.to_string()),
            Some(previous) if previous != device_id => ConnectionEvent::DeviceChanged {
                previous: previous.to_string(),
                current: device_id.to_string(),
            },
            Some(_) => ConnectionEvent::Reconnected(device_id.to_string()),
        };
        self.current = Some(device_id.to_string());
        self.last_known = Some(device_id.to_string());
        event
    }

    /// Forget the current device but remember it for the next `set`.
    pub fn disconnect(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn last_known(&self) -> Option<&str> {
        self.last_known.as_deref()
    }
}

/// Outcome of programming a parameter set.
#[derive(Debug, Clone)]
pub struct ProgramReport {
    pub sent: Vec<u8>,
    pub response: Response,
    pub echo_matches: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub samples: u64,
    /// Requests that timed out or came back short.
    pub dropped: u64,
}

/// Opt-in retry for exchanges that time out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Default)]
pub struct DeviceSession {
    transport: Option<Box<dyn Transport>>,
    identity: DeviceIdentity,
}

impl DeviceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        let mut session = Self::new();
        session.open(transport);
        session
    }

    /// Attach a transport, replacing (and dropping) any previous one.
    pub fn open(&mut self, transport: Box<dyn Transport>) {
        if self.transport.replace(transport).is_some() {
            log::debug!("replaced open transport");
        }
    }

    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            log::info!("device link closed");
        }
        self.identity.disconnect();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn set_device(&mut self, device_id: &str) -> ConnectionEvent {
        let event = self.identity.set(device_id);
        match &event {
            ConnectionEvent::Connected(id) => log::info!("connected to {}", id),
            ConnectionEvent::DeviceChanged { previous, current } => {
                log::warn!("device changed from {} to {}", previous, current)
            }
            ConnectionEvent::Reconnected(id) => log::info!("reconnected to {}", id),
        }
        event
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> LinkState {
        match self.identity.current() {
            Some(id) => LinkState::Connected(id.to_string()),
            None => LinkState::Disconnected,
        }
    }

    /// One request/response round trip.
    ///
    /// Returns whatever arrived before the deadline, which may be shorter
    /// than a full response. Fails with [`TransportError::Timeout`] only when
    /// nothing arrived at all.
    pub fn exchange(&mut self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let transport = self.transport.as_mut().ok_or(TransportError::NotOpen)?;
        transport.clear()?;
        transport.write(frame)?;
        transport.flush()?;

        let deadline = Instant::now() + timeout;
        let mut received = Vec::with_capacity(RESPONSE_LEN);
        while received.len() < RESPONSE_LEN {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let chunk = transport.read(RESPONSE_LEN - received.len(), deadline - now)?;
            if chunk.is_empty() {
                break;
            }
            received.extend_from_slice(&chunk);
        }

        if received.is_empty() {
            return Err(TransportError::Timeout);
        }
        log::debug!("exchange: sent {} bytes, received {}", frame.len(), received.len());
        Ok(received)
    }

    pub fn exchange_with_retry(
        &mut self,
        frame: &[u8],
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Vec<u8>, TransportError> {
        let mut attempt = 1;
        loop {
            match self.exchange(frame, timeout) {
                Err(TransportError::Timeout) if attempt < policy.attempts => {
                    log::warn!("no response (attempt {}/{})", attempt, policy.attempts);
                    thread::sleep(policy.backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Send a validated parameter set and check the device's echo.
    pub fn program(
        &mut self,
        codec: &FrameCodec,
        params: &CanonicalParameterSet,
        timeout: Duration,
    ) -> Result<ProgramReport, SessionError> {
        let sent = codec.encode_set_params(params, params.mode())?;
        let raw = self.exchange(&sent, timeout)?;
        let response = codec.decode_response(&raw)?;
        let echo_matches = response.echo_matches(&sent);
        if echo_matches {
            log::info!("programmed {} parameters for {}", params.len(), params.mode());
        } else {
            log::warn!("device echo differs from the programmed parameters");
            log::debug!("sent   {}", hex_dump(&sent[HEADER_LEN..]));
            log::debug!("echoed {}", hex_dump(&response.echoed_payload));
        }
        Ok(ProgramReport {
            sent,
            response,
            echo_matches,
        })
    }

    pub fn poll(&mut self, codec: &FrameCodec, timeout: Duration) -> Result<Response, SessionError> {
        let raw = self.exchange(&codec.encode_recv_only(), timeout)?;
        Ok(codec.decode_response(&raw)?)
    }

    /// Poll repeatedly until `stop` is set, handing each sample to `on_sample`.
    ///
    /// Timeouts and short responses are skipped; any other transport error
    /// ends the stream.
    pub fn stream<F>(
        &mut self,
        codec: &FrameCodec,
        timeout: Duration,
        stop: &AtomicBool,
        mut on_sample: F,
    ) -> Result<StreamSummary, SessionError>
    where
        F: FnMut(EgramSample),
    {
        let request = codec.encode_recv_only();
        let mut summary = StreamSummary::default();
        while !stop.load(Ordering::Relaxed) {
            let raw = match self.exchange(&request, timeout) {
                Ok(raw) => raw,
                Err(TransportError::Timeout) => {
                    summary.dropped += 1;
                    log::debug!("stream: no response");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match codec.decode_response(&raw) {
                Ok(response) => {
                    summary.samples += 1;
                    on_sample(response.sample());
                }
                Err(e) => {
                    summary.dropped += 1;
                    log::debug!("stream: dropped sample: {}", e);
                }
            }
        }
        log::info!(
            "stream stopped after {} samples ({} dropped)",
            summary.samples,
            summary.dropped
        );
        Ok(summary)
    }

    /// Run [`stream`](Self::stream) on a worker thread that owns the session
    /// until it stops.
    pub fn spawn_stream<F>(
        mut self,
        codec: FrameCodec,
        timeout: Duration,
        stop: Arc<AtomicBool>,
        on_sample: F,
    ) -> StreamHandle
    where
        F: FnMut(EgramSample) + Send + 'static,
    {
        let flag = Arc::clone(&stop);
        let worker = thread::spawn(move || {
            let result = self.stream(&codec, timeout, &flag, on_sample);
            (self, result)
        });
        StreamHandle { stop, worker }
    }
}

pub struct StreamHandle {
    stop: Arc<AtomicBool>,
    worker: JoinHandle<(DeviceSession, Result<StreamSummary, SessionError>)>,
}

impl StreamHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Stop the stream and get the session back.
    pub fn join(self) -> thread::Result<(DeviceSession, Result<StreamSummary, SessionError>)> {
        self.stop();
        self.worker.join()
    }
}
