//! Robot families and their upload sessions.
//!
//! Each supported family is a [`RobotType`] variant. Its opaque constants
//! (baud rate, transport, fixed target path) live in a [`RobotProfile`], and
//! its upload session implements [`RobotCommunicator`].

pub mod mbot2;
pub mod spike;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::port::DEFAULT_BAUD;
use crate::protocol::command::MAX_PACKAGE_CHARS;
use crate::protocol::frame::{DEFAULT_MAX_BLOCK, MAX_BLOCK_LIMIT};
use crate::protocol::response::{DEFAULT_POLL_INTERVAL, DEFAULT_RESPONSE_TIMEOUT};
use crate::protocol::scanner::DEFAULT_ACK_TIMEOUT;

pub use mbot2::Mbot2Communicator;
pub use spike::SpikeHubCommunicator;

/// Supported robot families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotType {
    /// Makeblock mBot2 (CyberPi controller), binary framed protocol.
    Mbot2,
    /// LEGO SPIKE Prime hub, JSON-over-serial protocol.
    #[serde(rename = "spike")]
    SpikeHub,
}

impl RobotType {
    /// All supported families.
    pub const ALL: [Self; 2] = [Self::Mbot2, Self::SpikeHub];

    /// Short identifier used in configuration and on the command line.
    pub fn id(self) -> &'static str {
        match self {
            Self::Mbot2 => "mbot2",
            Self::SpikeHub => "spike",
        }
    }

    /// Get the robot family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name
            .to_lowercase()
            .as_str()
        {
            "mbot2" | "mbot-2" | "cyberpi" => Some(Self::Mbot2),
            "spike" | "spikehub" | "spike-hub" | "spike-prime" => Some(Self::SpikeHub),
            _ => None,
        }
    }

    /// Per-family constants.
    pub fn profile(self) -> RobotProfile {
        match self {
            Self::Mbot2 => RobotProfile {
                robot: self,
                firmware_name: "mbot2",
                baud_rate: DEFAULT_BAUD,
                transport: Transport::Binary,
                target_path: Some(mbot2::TARGET_PATH),
            },
            Self::SpikeHub => RobotProfile {
                robot: self,
                firmware_name: "spike",
                baud_rate: DEFAULT_BAUD,
                transport: Transport::Json,
                target_path: None,
            },
        }
    }

    /// Create a communicator for this family on a native serial port.
    #[cfg(feature = "native")]
    pub fn create_communicator(
        self,
        port_name: &str,
        config: SessionConfig,
    ) -> Result<Box<dyn RobotCommunicator>> {
        use crate::clock::SystemClock;
        use crate::port::NativePortOpener;

        config.validate()?;
        match self {
            Self::Mbot2 => Ok(Box::new(Mbot2Communicator::new(
                NativePortOpener,
                SystemClock,
                port_name,
                config,
            ))),
            Self::SpikeHub => Ok(Box::new(SpikeHubCommunicator::new(
                NativePortOpener,
                SystemClock,
                port_name,
                config,
            ))),
        }
    }
}

impl fmt::Display for RobotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mbot2 => write!(f, "mBot2"),
            Self::SpikeHub => write!(f, "SPIKE Hub"),
        }
    }
}

/// How a family talks over the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Checksummed binary frames with per-frame acknowledgment.
    Binary,
    /// CR-terminated JSON commands with correlated replies.
    Json,
}

/// Opaque per-family constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RobotProfile {
    /// Family.
    pub robot: RobotType,
    /// Firmware name reported to the server.
    pub firmware_name: &'static str,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Wire protocol.
    pub transport: Transport,
    /// Fixed on-device path of the uploaded program, if the family has one.
    pub target_path: Option<&'static str>,
}

/// Descriptor sent to the server with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Firmware name.
    pub firmwarename: String,
    /// Robot family id.
    pub robot: String,
    /// Name shown to the user when pairing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brickname: Option<String>,
}

impl DeviceInfo {
    /// Descriptor for `robot`, optionally carrying a display name.
    pub fn new(robot: RobotType, brickname: Option<&str>) -> Self {
        let profile = robot.profile();
        Self {
            firmwarename: profile
                .firmware_name
                .to_string(),
            robot: robot
                .id()
                .to_string(),
            brickname: brickname.map(str::to_string),
        }
    }
}

/// A program to upload. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    bytes: Vec<u8>,
    file_name: String,
    robot: RobotType,
}

impl UploadRequest {
    /// Build a request from program bytes.
    pub fn new(bytes: impl Into<Vec<u8>>, file_name: impl Into<String>, robot: RobotType) -> Self {
        Self {
            bytes: bytes.into(),
            file_name: file_name.into(),
            robot,
        }
    }

    /// Read the program from a file.
    pub fn from_file(path: impl AsRef<Path>, robot: RobotType) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| {
                n.to_string_lossy()
                    .into_owned()
            })
            .ok_or_else(|| Error::Config(format!("not a file path: {}", path.display())))?;
        Ok(Self::new(bytes, file_name, robot))
    }

    /// Program bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Source file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Target family.
    pub fn robot(&self) -> RobotType {
        self.robot
    }
}

/// Tunables of an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Timeout of a single blocking port call.
    pub io_timeout: Duration,
    /// Deadline for one binary acknowledgment.
    pub ack_timeout: Duration,
    /// Deadline for one JSON command round-trip.
    pub response_timeout: Duration,
    /// Pause between empty reads.
    pub poll_interval: Duration,
    /// File bytes per binary block.
    pub max_body_chunk: usize,
    /// Encoded characters per `write_package`.
    pub max_package_chars: usize,
    /// Switch off the mBot2 REPL before uploading.
    pub quiet_repl: bool,
    /// Display name reported in [`DeviceInfo`].
    pub brick_name: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            io_timeout: Duration::from_millis(50),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_body_chunk: DEFAULT_MAX_BLOCK,
            max_package_chars: MAX_PACKAGE_CHARS,
            quiet_repl: false,
            brick_name: None,
        }
    }
}

impl SessionConfig {
    /// Set the baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the binary acknowledgment deadline.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the JSON round-trip deadline.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the pause between empty reads.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the binary block size.
    #[must_use]
    pub fn with_max_body_chunk(mut self, bytes: usize) -> Self {
        self.max_body_chunk = bytes;
        self
    }

    /// Set the `write_package` size.
    #[must_use]
    pub fn with_max_package_chars(mut self, chars: usize) -> Self {
        self.max_package_chars = chars;
        self
    }

    /// Enable or disable REPL quieting.
    #[must_use]
    pub fn with_quiet_repl(mut self, quiet: bool) -> Self {
        self.quiet_repl = quiet;
        self
    }

    /// Set the name reported to the server.
    #[must_use]
    pub fn with_brick_name(mut self, name: impl Into<String>) -> Self {
        self.brick_name = Some(name.into());
        self
    }

    /// Reject values the protocols cannot carry.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Config("baud rate must be positive".into()));
        }
        if self.max_body_chunk == 0 || self.max_body_chunk > MAX_BLOCK_LIMIT {
            return Err(Error::Config(format!(
                "block size must be between 1 and {MAX_BLOCK_LIMIT} bytes, got {}",
                self.max_body_chunk
            )));
        }
        if self.max_package_chars == 0 || self.max_package_chars > MAX_PACKAGE_CHARS {
            return Err(Error::Config(format!(
                "package size must be between 1 and {MAX_PACKAGE_CHARS} characters, got {}",
                self.max_package_chars
            )));
        }
        Ok(())
    }
}

/// Progress callback: units sent so far and total units.
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize);

/// Upload session for one connected robot.
///
/// Every `Err` returned by [`upload`](Self::upload) leaves the port closed
/// and carries a message suitable for the user (see
/// [`Error::user_message`]).
pub trait RobotCommunicator {
    /// Family handled by this communicator.
    fn robot_type(&self) -> RobotType;

    /// Descriptor sent to the server.
    fn device_info(&self) -> DeviceInfo;

    /// Transfer the program to the robot.
    fn upload(&mut self, request: &UploadRequest, progress: Progress<'_>) -> Result<()>;

    /// Close the serial port, if open.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robot_type_from_name() {
        assert_eq!(RobotType::from_name("mbot2"), Some(RobotType::Mbot2));
        assert_eq!(RobotType::from_name("SPIKE"), Some(RobotType::SpikeHub));
        assert_eq!(RobotType::from_name("ev3"), None);
        for robot in RobotType::ALL {
            assert_eq!(RobotType::from_name(robot.id()), Some(robot));
        }
    }

    #[test]
    fn test_profiles() {
        let mbot = RobotType::Mbot2.profile();
        assert_eq!(mbot.baud_rate, 115200);
        assert_eq!(mbot.transport, Transport::Binary);
        assert_eq!(mbot.target_path, Some("/flash/main.py"));

        let spike = RobotType::SpikeHub.profile();
        assert_eq!(spike.transport, Transport::Json);
        assert_eq!(spike.target_path, None);
    }

    #[test]
    fn test_device_info_json() {
        let info = DeviceInfo::new(RobotType::Mbot2, Some("cyberpi-1"));
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            serde_json::json!({"firmwarename": "mbot2", "robot": "mbot2", "brickname": "cyberpi-1"})
        );

        let info = DeviceInfo::new(RobotType::SpikeHub, None);
        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("brickname").is_none());
        assert_eq!(value["robot"], "spike");
    }

    #[test]
    fn test_upload_request_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.py");
        std::fs::write(&path, b"print('hi')\n").unwrap();

        let request = UploadRequest::from_file(&path, RobotType::Mbot2).unwrap();
        assert_eq!(request.file_name(), "main.py");
        assert_eq!(request.bytes(), b"print('hi')\n");
        assert_eq!(request.robot(), RobotType::Mbot2);
    }

    #[test]
    fn test_session_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(
            SessionConfig::default()
                .with_max_body_chunk(MAX_BLOCK_LIMIT + 1)
                .validate()
                .is_err()
        );
        assert!(
            SessionConfig::default()
                .with_max_package_chars(0)
                .validate()
                .is_err()
        );
        assert!(SessionConfig::default().with_baud(0).validate().is_err());
    }
}
