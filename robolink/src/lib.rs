//! # robolink
//!
//! A library for uploading programs to educational robots over a serial
//! link.
//!
//! This crate provides:
//!
//! - the mBot2 binary upload protocol (checksummed frames, per-frame
//!   acknowledgments)
//! - the SPIKE Hub JSON command protocol (correlated commands, chunked
//!   base64 transfer)
//! - upload sessions that drive either protocol over a [`Port`]
//! - the [`Connector`] state machine that pairs a robot with a programming
//!   server, polls it and uploads downloaded programs
//!
//! ## Supported Robots
//!
//! - mBot2 (CyberPi)
//! - LEGO SPIKE Prime hub
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use robolink::{RobotType, SessionConfig, UploadRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = UploadRequest::from_file("main.py", RobotType::Mbot2)?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut robot =
//!             RobotType::Mbot2.create_communicator("/dev/ttyACM0", SessionConfig::default())?;
//!         robot.upload(&request, &mut |sent, total| {
//!             println!("Uploading: {sent}/{total}");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod connector;
pub mod error;
pub mod port;
pub mod protocol;
pub mod robot;

#[cfg(feature = "native")]
pub use connector::NativeCommunicatorFactory;
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortOpener};
pub use {
    clock::{Clock, SystemClock},
    connector::{
        CommunicatorFactory, Connector, Event, Program, ServerCommand, ServerCommunicator,
        ServerReply, ServerRequest, State, Transition,
    },
    error::{Error, Result},
    port::{Port, PortOpener, SerialConfig},
    robot::{
        DeviceInfo, Mbot2Communicator, RobotCommunicator, RobotProfile, RobotType, SessionConfig,
        SpikeHubCommunicator, Transport, UploadRequest,
    },
};
