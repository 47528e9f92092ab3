//! Error types for robolink.

use std::io;
use thiserror::Error;

/// Result type for robolink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for robolink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The port accepted fewer bytes than were handed to it.
    #[error("Short write: {written} of {expected} bytes accepted")]
    ShortWrite {
        /// Bytes the port accepted.
        written: usize,
        /// Bytes that should have been written.
        expected: usize,
    },

    /// No valid response arrived before the deadline.
    #[error("No response from robot: {0}")]
    NoResponse(String),

    /// The robot explicitly rejected a frame or command.
    #[error("Robot rejected {0}")]
    Nack(String),

    /// Malformed or unexpected data from the robot.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON encoding or decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registration, polling or program download failed.
    #[error("Server error: {0}")]
    Server(String),

    /// Unsupported robot or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether repeating the operation later may succeed.
    ///
    /// Transport, timeout and device rejections are retryable: the session
    /// closes the port and the connector keeps polling. Server and
    /// configuration failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::ShortWrite { .. } | Self::NoResponse(_) | Self::Nack(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            Self::Protocol(_)
            | Self::Json(_)
            | Self::Server(_)
            | Self::Unsupported(_)
            | Self::Config(_) => false,
        }
    }

    /// Short message suitable for showing to the robot's operator.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoResponse(_) => {
                "No answer received from the robot, please try again".to_string()
            },
            Self::Nack(_) => "The robot rejected the program transfer, please try again".to_string(),
            Self::Io(_) | Self::ShortWrite { .. } => {
                "Something went wrong while transmitting the program, please try again".to_string()
            },
            #[cfg(feature = "native")]
            Self::Serial(_) => {
                "Could not open the serial connection to the robot, please reconnect it".to_string()
            },
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::NoResponse("ack".into()).is_retryable());
        assert!(Error::Nack("body frame".into()).is_retryable());
        assert!(
            Error::ShortWrite {
                written: 3,
                expected: 9
            }
            .is_retryable()
        );
        assert!(!Error::Server("push failed".into()).is_retryable());
        assert!(!Error::Config("bad baud".into()).is_retryable());
    }

    #[test]
    fn test_timeout_and_nack_messages_differ() {
        let timeout = Error::NoResponse("ack".into()).user_message();
        let nack = Error::Nack("ack".into()).user_message();
        assert_ne!(timeout, nack);
    }
}
