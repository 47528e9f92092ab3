//! mBot2 upload session.
//!
//! The upload is a strict request/acknowledge exchange: every frame produced
//! by [`encode_upload`] is written and then acknowledged before the next one
//! goes out. The first failed write, negative status or missing
//! acknowledgment ends the session and closes the port.

use log::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig};
use crate::protocol::frame::{FrameKind, OutgoingFrame, encode_upload};
use crate::protocol::scanner::await_ack;
use crate::robot::{DeviceInfo, Progress, RobotCommunicator, RobotType, SessionConfig, UploadRequest};

/// Path the program is written to on the controller; the firmware runs it
/// at boot.
pub const TARGET_PATH: &str = "/flash/main.py";

/// Binary-protocol session for one mBot2.
pub struct Mbot2Communicator<O: PortOpener, C: Clock> {
    opener: O,
    clock: C,
    port_name: String,
    config: SessionConfig,
    port: Option<O::Port>,
}

impl<O: PortOpener, C: Clock> Mbot2Communicator<O, C> {
    /// Create a session on `port_name`. The port is opened per upload.
    pub fn new(opener: O, clock: C, port_name: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            opener,
            clock,
            port_name: port_name.into(),
            config,
            port: None,
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a port handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.port
            .as_ref()
            .is_some_and(Port::is_open)
    }

    fn close_port(&mut self) {
        if let Some(mut port) = self
            .port
            .take()
        {
            if let Err(e) = port.close() {
                warn!("Failed to close {}: {e}", self.port_name);
            }
        }
    }

    fn open_port(&mut self) -> Result<()> {
        self.close_port();
        let serial = SerialConfig::new(&self.port_name, self.config.baud_rate)
            .with_timeout(self.config.io_timeout);
        let mut port = self
            .opener
            .open(&serial)?;
        port.clear_buffers()?;
        debug!("Using {} at {} baud", port.name(), port.baud_rate());
        self.port = Some(port);
        Ok(())
    }

    fn send_frames(&mut self, frames: &[OutgoingFrame], total: usize, progress: Progress<'_>) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Protocol("port not open".into()))?;

        progress(0, total);
        for frame in frames {
            let what = describe(frame.kind);
            debug!("Sending {what} ({} bytes)", frame.bytes.len());
            port.write_frame(&frame.bytes)?;

            let acked = await_ack(
                port,
                &self.clock,
                self.config.ack_timeout,
                self.config.poll_interval,
                &what,
            );
            match (frame.kind, acked) {
                // REPL scripts are best effort; older firmware never answers them.
                (FrameKind::Script, Err(Error::NoResponse(_))) => {
                    debug!("No acknowledgment for {what}, continuing");
                },
                (_, result) => result?,
            }

            if let FrameKind::FileBlock { offset, len } = frame.kind {
                progress(offset + len, total);
            }
        }
        Ok(())
    }
}

fn describe(kind: FrameKind) -> String {
    match kind {
        FrameKind::EnterUploadMode => "upload mode switch".to_string(),
        FrameKind::Script => "REPL script".to_string(),
        FrameKind::FileHeader => "file header".to_string(),
        FrameKind::FileBlock { offset, .. } => format!("block at {offset}"),
    }
}

impl<O: PortOpener, C: Clock> RobotCommunicator for Mbot2Communicator<O, C> {
    fn robot_type(&self) -> RobotType {
        RobotType::Mbot2
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(
            RobotType::Mbot2,
            Some(
                self.config
                    .brick_name
                    .as_deref()
                    .unwrap_or(&self.port_name),
            ),
        )
    }

    fn upload(&mut self, request: &UploadRequest, progress: Progress<'_>) -> Result<()> {
        if request.robot() != RobotType::Mbot2 {
            return Err(Error::Unsupported(format!(
                "{} program cannot be uploaded to an mBot2",
                request.robot()
            )));
        }

        let frames = encode_upload(
            request.bytes(),
            TARGET_PATH,
            self.config.max_body_chunk,
            self.config.quiet_repl,
        );
        info!(
            "Uploading {} ({} bytes, {} frames) to {}",
            request.file_name(),
            request.bytes().len(),
            frames.len(),
            self.port_name
        );

        let result = self
            .open_port()
            .and_then(|()| self.send_frames(&frames, request.bytes().len(), progress));
        match result {
            Ok(()) => {
                info!("Upload to {} complete", self.port_name);
                Ok(())
            },
            Err(e) => {
                warn!("Upload to {} aborted: {e}", self.port_name);
                self.close_port();
                Err(e)
            },
        }
    }

    fn close(&mut self) {
        self.close_port();
    }
}
