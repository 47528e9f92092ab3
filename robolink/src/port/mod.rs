//! Port abstraction for serial communication with the robot.
//!
//! Upload sessions never touch `serialport` directly. They talk to a
//! [`Port`] obtained from a [`PortOpener`], which keeps the protocol layer
//! I/O-agnostic and lets tests substitute scripted ports.
//!
//! ```text
//! +------------------------+
//! |  Upload session        |
//! |  (mbot2, spike)        |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+
//! |  PortOpener / Port     |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+
//! |  NativePort            |
//! |  (serialport)          |
//! +------------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Baud rate used by both supported robot families.
pub const DEFAULT_BAUD: u32 = 115200;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout of a single blocking read or write.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(50),
        }
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An open serial connection.
///
/// Reads return whatever is buffered, possibly nothing; implementations may
/// report an empty read either as `Ok(0)` or as a `TimedOut` error.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard anything pending in the input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Whether the port is still open.
    fn is_open(&self) -> bool;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write one complete protocol unit and flush it.
    ///
    /// A port that stops accepting bytes part-way yields
    /// [`Error::ShortWrite`].
    fn write_frame(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            match self.write(&buf[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        if written != buf.len() {
            return Err(Error::ShortWrite {
                written,
                expected: buf.len(),
            });
        }
        self.flush()?;
        Ok(())
    }

    /// Read whatever is currently available, treating a read timeout as
    /// "nothing yet".
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Factory that opens ports by name.
///
/// Each robot communicator owns one opener and at most one open port.
pub trait PortOpener: Send {
    /// Port type produced by this opener.
    type Port: Port;

    /// Open a port with the given configuration.
    fn open(&mut self, config: &SerialConfig) -> Result<Self::Port>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortOpener};

#[cfg(test)]
mod tests {
    use super::mock::{MockOpener, MockPort};
    use super::*;

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyACM0", DEFAULT_BAUD)
            .with_timeout(Duration::from_millis(200));
        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_write_frame_reports_short_write() {
        let opener = MockOpener::new(|_| Vec::new());
        opener.limit_accepted_bytes(4);
        let mut port = MockPort::from_opener(&opener, "mock");

        let err = port.write_frame(&[0u8; 9]).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortWrite {
                written: 4,
                expected: 9
            }
        ));
    }

    #[test]
    fn test_read_available_maps_timeout_to_zero() {
        let opener = MockOpener::new(|_| Vec::new());
        let mut port = MockPort::from_opener(&opener, "mock");
        let mut buf = [0u8; 8];
        assert_eq!(port.read_available(&mut buf).unwrap(), 0);
    }
}
