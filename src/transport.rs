//! Byte-oriented duplex links to a device.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;

/// Timeout the port is opened with; each read sets its own.
const OPEN_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no device link is open")]
    NotOpen,
    #[error("timed out waiting for the device")]
    Timeout,
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        TransportError::Io(err.into())
    }
}

/// The four operations the protocol needs from a link.
///
/// Only one exchange may be in flight on a transport; callers hold it by
/// `&mut` for the whole write/read round trip.
pub trait Transport: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Up to `max_len` bytes. Returns an empty buffer when nothing arrived
    /// within `timeout`.
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    /// Drop anything buffered in either direction.
    fn clear(&mut self) -> Result<(), TransportError>;
}

/// A serial port opened 8N1.
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(OPEN_TIMEOUT)
            .open()?;
        log::info!("opened {} at {} baud", port_name, baud_rate);
        Ok(Self {
            name: port_name.to_string(),
            port,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.port.set_timeout(timeout)?;
        let mut buf = vec![0; max_len];
        match self.port.read(buf.as_mut_slice()) {
            Ok(bytes_read) => {
                buf.truncate(bytes_read);
                Ok(buf)
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port.flush()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), TransportError> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, TransportError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|port| port.port_name)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialport_errors_become_io_errors() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert!(matches!(TransportError::from(err), TransportError::Io(_)));
    }

    #[test]
    fn opening_a_missing_port_fails() {
        let result = SerialTransport::open("/dev/does-not-exist-dcm", 115200);
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[test]
    fn error_messages() {
        assert_eq!(TransportError::NotOpen.to_string(), "no device link is open");
        assert_eq!(
            TransportError::Timeout.to_string(),
            "timed out waiting for the device"
        );
    }
}
