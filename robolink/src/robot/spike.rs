//! SPIKE Hub upload session.
//!
//! ```text
//! host                                   hub
//!  | program_terminate              -->   |
//!  |                              <--  r  |
//!  | start_write_program(size,meta) -->   |
//!  |                  <--  r{transferid}  |
//!  | write_package(data,transferid) -->   |   repeated per
//!  |                  <--  r{transferid}  |   512-char chunk
//! ```

use log::{debug, info, warn};
use serde_json::Value;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig};
use crate::protocol::command::{
    Command, CorrelationIds, DEFAULT_SLOT, Mode, ProgramMeta, TransferState, execute_params,
    start_write_params, terminate_params, write_package_params,
};
use crate::protocol::response::{Response, ResponseMatcher, await_response};
use crate::robot::{DeviceInfo, Progress, RobotCommunicator, RobotType, SessionConfig, UploadRequest};

/// JSON-protocol session for one SPIKE Hub.
pub struct SpikeHubCommunicator<O: PortOpener, C: Clock> {
    opener: O,
    clock: C,
    port_name: String,
    config: SessionConfig,
    port: Option<O::Port>,
    ids: CorrelationIds,
    matcher: ResponseMatcher,
}

impl<O: PortOpener, C: Clock> SpikeHubCommunicator<O, C> {
    /// Create a session on `port_name`. The port is opened per upload.
    pub fn new(opener: O, clock: C, port_name: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            opener,
            clock,
            port_name: port_name.into(),
            config,
            port: None,
            ids: CorrelationIds::new(),
            matcher: ResponseMatcher::new(),
        }
    }

    /// Whether a port handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.port
            .as_ref()
            .is_some_and(Port::is_open)
    }

    /// Start the program stored in `slot`.
    ///
    /// Opens the port if no upload left it open. Never invoked as part of
    /// [`upload`](RobotCommunicator::upload).
    pub fn execute_program(&mut self, slot: u8) -> Result<()> {
        let result = self
            .ensure_open()
            .and_then(|()| {
                self.send(Mode::ProgramExecute, execute_params(slot))
                    .map(drop)
            });

        if let Err(e) = &result {
            warn!("Starting slot {slot} on {} failed: {e}", self.port_name);
            self.close_port();
        } else {
            info!("Started slot {slot} on {}", self.port_name);
        }
        result
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
        self.matcher
            .reset();
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

    fn ensure_open(&mut self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            self.open_port()
        }
    }

    /// Send one command and wait for its reply.
    fn send(&mut self, mode: Mode, params: Value) -> Result<Response> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Protocol("port not open".into()))?;

        let id = self
            .ids
            .issue();
        let command = Command::new(mode, params, id.clone());
        debug!("Sending {} ({id})", mode.as_str());

        let result = round_trip(
            port,
            &self.clock,
            &mut self.matcher,
            &self.config,
            &command,
        );
        self.ids
            .release(&id);
        result.map_err(|e| match e {
            Error::Nack(msg) => Error::Nack(format!("{}: {msg}", mode.as_str())),
            Error::NoResponse(msg) => Error::NoResponse(format!("{}: {msg}", mode.as_str())),
            other => other,
        })
    }

    fn transfer(&mut self, request: &UploadRequest, progress: Progress<'_>) -> Result<()> {
        self.send(Mode::ProgramTerminate, terminate_params())?;

        let mut state = TransferState::new(request.bytes());
        let total = state.encoded_len();
        let meta = ProgramMeta::python(self.clock.unix_time());
        let reply = self.send(
            Mode::StartWriteProgram,
            start_write_params(DEFAULT_SLOT, total, &meta),
        )?;
        state.rotate(reply.transfer_id);

        progress(0, total);
        let chunks: Vec<String> = state
            .remaining_chunks(self.config.max_package_chars)
            .into_iter()
            .map(|chunk| chunk.data.to_string())
            .collect();
        for data in chunks {
            let transfer_id = state
                .transfer_id()
                .ok_or_else(|| Error::Protocol("hub did not hand out a transfer id".into()))?
                .to_string();
            let reply = self.send(
                Mode::WritePackage,
                write_package_params(&data, &transfer_id),
            )?;
            state.rotate(reply.transfer_id);
            state.advance(data.len());
            progress(state.cursor(), total);
        }
        Ok(())
    }
}

fn round_trip<P, C>(
    port: &mut P,
    clock: &C,
    matcher: &mut ResponseMatcher,
    config: &SessionConfig,
    command: &Command,
) -> Result<Response>
where
    P: Port + ?Sized,
    C: Clock + ?Sized,
{
    port.write_frame(&command.to_wire()?)?;
    await_response(
        port,
        clock,
        matcher,
        &command.id,
        config.response_timeout,
        config.poll_interval,
    )
}

impl<O: PortOpener, C: Clock> RobotCommunicator for SpikeHubCommunicator<O, C> {
    fn robot_type(&self) -> RobotType {
        RobotType::SpikeHub
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(
            RobotType::SpikeHub,
            self.config
                .brick_name
                .as_deref(),
        )
    }

    fn upload(&mut self, request: &UploadRequest, progress: Progress<'_>) -> Result<()> {
        if request.robot() != RobotType::SpikeHub {
            return Err(Error::Unsupported(format!(
                "{} program cannot be uploaded to a SPIKE Hub",
                request.robot()
            )));
        }
        info!(
            "Uploading {} ({} bytes) to slot {DEFAULT_SLOT} on {}",
            request.file_name(),
            request.bytes().len(),
            self.port_name
        );

        let result = self
            .open_port()
            .and_then(|()| self.transfer(request, progress));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fake::FakeClock;
    use crate::port::mock::MockOpener;
    use crate::protocol::command::MAX_PACKAGE_CHARS;
    use base64::Engine;
    use serde_json::json;

    /// Parse a written command, terminator stripped.
    fn parse(written: &[u8]) -> Value {
        assert_eq!(written.last(), Some(&0x0D));
        serde_json::from_slice(&written[..written.len() - 1]).unwrap()
    }

    /// A hub that echoes each command and then answers it, handing out a
    /// new transfer id with every reply.
    fn hub() -> MockOpener {
        let mut next_transfer = 100;
        MockOpener::new(move |written| {
            let cmd = parse(written);
            let id = cmd["i"].as_str().unwrap().to_string();
            let echo = written[..written.len() - 1].to_vec();
            let reply = match cmd["m"].as_str().unwrap() {
                "start_write_program" | "write_package" => {
                    next_transfer += 1;
                    json!({"i": id, "r": {"transferid": next_transfer.to_string()}})
                },
                _ => json!({"i": id, "r": null}),
            };
            let mut reply = serde_json::to_vec(&reply).unwrap();
            reply.push(b'\r');
            vec![echo, reply]
        })
    }

    fn session(opener: &MockOpener) -> SpikeHubCommunicator<MockOpener, FakeClock> {
        SpikeHubCommunicator::new(
            opener.clone(),
            FakeClock::new(),
            "ttyACM0",
            SessionConfig::default(),
        )
    }

    #[test]
    fn test_upload_command_sequence() {
        let opener = hub();
        let mut comm = session(&opener);
        let program = vec![b'x'; 1000];
        let request = UploadRequest::new(program.clone(), "main.py", RobotType::SpikeHub);
        let mut seen = Vec::new();

        comm.upload(&request, &mut |sent, total| seen.push((sent, total)))
            .unwrap();

        let commands: Vec<Value> = opener
            .writes()
            .iter()
            .map(|w| parse(w))
            .collect();
        let modes: Vec<&str> = commands
            .iter()
            .map(|c| c["m"].as_str().unwrap())
            .collect();
        // 1000 bytes -> 1336 base64 characters -> 512 + 512 + 312.
        assert_eq!(
            modes,
            vec![
                "program_terminate",
                "start_write_program",
                "write_package",
                "write_package",
                "write_package",
            ]
        );

        let encoded = base64::engine::general_purpose::STANDARD.encode(&program);
        assert_eq!(commands[1]["p"]["size"], encoded.len());
        assert_eq!(commands[1]["p"]["slotid"], 0);
        assert_eq!(commands[1]["p"]["meta"]["created"], 1_700_000_000i64);

        // Each chunk carries the id handed out by the previous reply.
        let mut data = String::new();
        for (n, cmd) in commands[2..].iter().enumerate() {
            assert_eq!(cmd["p"]["transferid"], (101 + n).to_string());
            let chunk = cmd["p"]["data"].as_str().unwrap();
            assert!(chunk.len() <= MAX_PACKAGE_CHARS);
            data.push_str(chunk);
        }
        assert_eq!(data, encoded);

        assert_eq!(seen.first(), Some(&(0, 1336)));
        assert_eq!(seen.last(), Some(&(1336, 1336)));
        assert!(comm.is_connected());
    }

    #[test]
    fn test_ids_are_fresh_per_command() {
        let opener = hub();
        let mut comm = session(&opener);
        let request = UploadRequest::new(vec![1u8; 600], "main.py", RobotType::SpikeHub);
        comm.upload(&request, &mut |_, _| {})
            .unwrap();

        let ids: Vec<String> = opener
            .writes()
            .iter()
            .map(|w| parse(w)["i"].as_str().unwrap().to_string())
            .collect();
        for id in &ids {
            assert_eq!(id.len(), 4);
        }
    }

    #[test]
    fn test_error_reply_aborts_upload() {
        let opener = MockOpener::new(|written| {
            let cmd = parse(written);
            let id = cmd["i"].as_str().unwrap();
            let reply = if cmd["m"] == "start_write_program" {
                json!({"i": id, "e": "bm8gc3BhY2U="})
            } else {
                json!({"i": id, "r": null})
            };
            vec![serde_json::to_vec(&reply).unwrap()]
        });
        let mut comm = session(&opener);
        let request = UploadRequest::new(vec![0u8; 10], "main.py", RobotType::SpikeHub);

        let err = comm
            .upload(&request, &mut |_, _| {})
            .unwrap_err();

        assert!(matches!(err, Error::Nack(_)));
        assert_eq!(opener.writes().len(), 2);
        assert!(!opener.is_port_open());
    }

    #[test]
    fn test_silent_hub_times_out() {
        let opener = MockOpener::new(|_| Vec::new());
        let mut comm = session(&opener);
        let request = UploadRequest::new(vec![0u8; 10], "main.py", RobotType::SpikeHub);

        let err = comm
            .upload(&request, &mut |_, _| {})
            .unwrap_err();

        assert!(matches!(err, Error::NoResponse(_)));
        assert_eq!(opener.writes().len(), 1);
        assert!(!opener.is_port_open());
        assert_eq!(opener.close_count(), 1);
    }

    #[test]
    fn test_missing_transfer_id_is_protocol_error() {
        let opener = MockOpener::new(|written| {
            let cmd = parse(written);
            vec![serde_json::to_vec(&json!({"i": cmd["i"], "r": null})).unwrap()]
        });
        let mut comm = session(&opener);
        let request = UploadRequest::new(vec![0u8; 10], "main.py", RobotType::SpikeHub);

        let err = comm
            .upload(&request, &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(!opener.is_port_open());
    }

    #[test]
    fn test_execute_program_is_separate() {
        let opener = hub();
        let mut comm = session(&opener);

        comm.execute_program(3)
            .unwrap();

        let writes = opener.writes();
        assert_eq!(writes.len(), 1);
        let cmd = parse(&writes[0]);
        assert_eq!(cmd["m"], "program_execute");
        assert_eq!(cmd["p"], json!({"slotid": 3}));
        assert_eq!(opener.opened().len(), 1);
    }

    #[test]
    fn test_upload_never_executes() {
        let opener = hub();
        let mut comm = session(&opener);
        let request = UploadRequest::new(vec![7u8; 20], "main.py", RobotType::SpikeHub);
        comm.upload(&request, &mut |_, _| {})
            .unwrap();

        assert!(
            opener
                .writes()
                .iter()
                .all(|w| parse(w)["m"] != "program_execute")
        );
    }
}
