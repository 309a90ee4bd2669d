//! # Pacemaker Device-Controller-Monitor Library
//!
//! This library holds the core of a pacemaker programmer. It loads the
//! parameter schema, validates operator input into canonical parameter sets,
//! encodes them into the device's fixed binary frames, and drives the serial
//! request/response exchange, including egram streaming. An in-process
//! simulated pacemaker answers frames exactly like the hardware.

pub mod config;
pub mod frame;
pub mod mode;
pub mod schema;
pub mod session;
pub mod simulator;
pub mod store;
pub mod transport;
pub mod validate;

pub use config::{ConfigError, LinkConfig};
pub use frame::{EgramSample, FrameCodec, FrameError, Response};
pub use mode::Mode;
pub use schema::{ParameterField, ParameterSchema, SchemaError};
pub use session::{ConnectionEvent, DeviceSession, RetryPolicy, SessionError};
pub use simulator::SimulatedPacemaker;
pub use store::{MemoryStore, ParameterStore};
pub use transport::{SerialTransport, Transport, TransportError};
pub use validate::{validate, CanonicalParameterSet, FieldError, RawInputs};
