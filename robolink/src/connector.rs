//! Connection lifecycle of one wired robot.
//!
//! ```text
//!  Discover ──> WaitForConnectButtonPress ──(button)──> ConnectButtonIsPressed
//!     ^                                                        │
//!     │                                                        v
//!  TokenTimeout <──(abort)── WaitForServer ──(repeat)──> WaitForCmd <──┐
//!                                 │                       │    ^       │
//!                                 v                       │    │       │
//!                             ErrorHttp <──(failure)──────┘    │       │
//!                                                   (download) v       │
//!                                               WaitUpload ──> ErrorUploadToRobot
//! ```
//!
//! [`State::next`] is the whole transition table. [`Connector::step`] does
//! the work belonging to the current state through the collaborators it is
//! handed and reports every transition it fired.

use std::fmt;
use std::io::Write;

use log::{debug, error, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::robot::{DeviceInfo, RobotCommunicator, RobotType, UploadRequest};

/// Length of a pairing token.
pub const TOKEN_LEN: usize = 8;

/// Characters a pairing token is drawn from; no `0/O` or `1/I` look-alikes.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a pairing token the user types into the web client.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
        .collect()
}

/// Connector states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Looking for the robot; the communicator is (re)created here.
    #[default]
    Discover,
    /// Waiting for the operator to request pairing.
    WaitForConnectButtonPress,
    /// Pairing requested; a token is generated next.
    ConnectButtonIsPressed,
    /// Registration sent, waiting for the server.
    WaitForServer,
    /// Paired; polling the server for commands.
    WaitForCmd,
    /// A program was downloaded and is being uploaded.
    WaitUpload,
    /// The server could not be reached or answered nonsense. Needs a reset.
    ErrorHttp,
    /// The upload to the robot failed; polling resumes.
    ErrorUploadToRobot,
    /// The server expired the pairing token.
    TokenTimeout,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::WaitForConnectButtonPress => "WAIT_FOR_CONNECT_BUTTON_PRESS",
            Self::ConnectButtonIsPressed => "CONNECT_BUTTON_IS_PRESSED",
            Self::WaitForServer => "WAIT_FOR_SERVER",
            Self::WaitForCmd => "WAIT_FOR_CMD",
            Self::WaitUpload => "WAIT_UPLOAD",
            Self::ErrorHttp => "ERROR_HTTP",
            Self::ErrorUploadToRobot => "ERROR_UPLOAD_TO_ROBOT",
            Self::TokenTimeout => "TOKEN_TIMEOUT",
        };
        f.write_str(name)
    }
}

/// Inputs of the transition function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A communicator for the robot exists.
    CommunicatorReady,
    /// The operator pressed "connect".
    ConnectButtonPressed,
    /// A pairing token was generated.
    TokenIssued,
    /// The server accepted the registration.
    Registered,
    /// The server expired the token.
    RegistrationExpired,
    /// Start over after an expired token.
    Restart,
    /// A program was downloaded.
    ProgramReceived,
    /// The upload to the robot succeeded.
    UploadFinished,
    /// The upload to the robot failed.
    UploadFailed,
    /// Go back to polling after an upload failure.
    Resume,
    /// The server failed.
    ServerFailed,
    /// Operator reset.
    Reset,
}

impl State {
    /// Pure transition function. Events that do not apply leave the state
    /// unchanged.
    #[must_use]
    pub fn next(self, event: Event) -> Self {
        use Event as E;
        match (self, event) {
            (_, E::Reset) => Self::Discover,
            (Self::Discover, E::CommunicatorReady) => Self::WaitForConnectButtonPress,
            (Self::WaitForConnectButtonPress, E::ConnectButtonPressed) => {
                Self::ConnectButtonIsPressed
            },
            (Self::ConnectButtonIsPressed, E::TokenIssued) => Self::WaitForServer,
            (Self::WaitForServer, E::Registered) => Self::WaitForCmd,
            (Self::WaitForServer, E::RegistrationExpired) => Self::TokenTimeout,
            (Self::TokenTimeout, E::Restart) => Self::Discover,
            (Self::WaitForCmd, E::ProgramReceived) => Self::WaitUpload,
            (Self::WaitUpload, E::UploadFinished) => Self::WaitForCmd,
            (Self::WaitForCmd | Self::WaitUpload, E::UploadFailed) => Self::ErrorUploadToRobot,
            (Self::ErrorUploadToRobot, E::Resume) => Self::WaitForCmd,
            (
                Self::ConnectButtonIsPressed | Self::WaitForServer | Self::WaitForCmd,
                E::ServerFailed,
            ) => Self::ErrorHttp,
            (state, _) => state,
        }
    }

    /// Whether only an operator reset leaves this state.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::ErrorHttp)
    }
}

/// A state entered during a step, with an optional message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State entered.
    pub state: State,
    /// Extra information, e.g. why an upload failed.
    pub detail: Option<String>,
}

/// Commands exchanged with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerCommand {
    /// Register a new pairing token.
    Register,
    /// Poll for work.
    Push,
    /// Nothing to do, ask again.
    Repeat,
    /// The token expired.
    Abort,
    /// A program is ready for download.
    Download,
}

/// Body of every request to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerRequest {
    /// Robot descriptor.
    #[serde(flatten)]
    pub device: DeviceInfo,
    /// Pairing token.
    pub token: String,
    /// Request kind.
    pub cmd: ServerCommand,
}

/// Server answer to a push request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerReply {
    /// Raw command string.
    pub cmd: String,
}

impl ServerReply {
    /// Reply carrying `cmd`.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    /// The command, if it is one the connector knows.
    pub fn command(&self) -> Option<ServerCommand> {
        serde_json::from_value(serde_json::Value::String(self.cmd.clone())).ok()
    }
}

/// A downloaded program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Program bytes.
    pub bytes: Vec<u8>,
    /// Program name.
    pub name: String,
}

/// Connection to the programming server.
pub trait ServerCommunicator {
    /// Send a register or push request.
    fn push_request(&mut self, request: &ServerRequest) -> Result<ServerReply>;

    /// Fetch the program announced by a `download` reply.
    fn download_program(&mut self, request: &ServerRequest) -> Result<Program>;
}

/// Creates the communicator for a robot when the connector (re)discovers it.
pub trait CommunicatorFactory {
    /// Create a communicator for `robot`.
    fn create(&self, robot: RobotType) -> Result<Box<dyn RobotCommunicator>>;
}

/// Factory for communicators on one native serial port.
#[cfg(feature = "native")]
#[derive(Debug, Clone)]
pub struct NativeCommunicatorFactory {
    port_name: String,
    config: crate::robot::SessionConfig,
}

#[cfg(feature = "native")]
impl NativeCommunicatorFactory {
    /// Factory for `port_name`.
    pub fn new(port_name: impl Into<String>, config: crate::robot::SessionConfig) -> Self {
        Self {
            port_name: port_name.into(),
            config,
        }
    }
}

#[cfg(feature = "native")]
impl CommunicatorFactory for NativeCommunicatorFactory {
    fn create(&self, robot: RobotType) -> Result<Box<dyn RobotCommunicator>> {
        robot.create_communicator(&self.port_name, self.config.clone())
    }
}

/// State machine driving one robot.
pub struct Connector {
    robot: RobotType,
    state: State,
    token: Option<String>,
    communicator: Option<Box<dyn RobotCommunicator>>,
}

impl Connector {
    /// New connector in [`State::Discover`].
    pub fn new(robot: RobotType) -> Self {
        Self {
            robot,
            state: State::Discover,
            token: None,
            communicator: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Pairing token of the current cycle.
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_deref()
    }

    /// Robot family.
    pub fn robot(&self) -> RobotType {
        self.robot
    }

    /// Operator pressed "connect". Returns whether the press was accepted.
    pub fn press_connect_button(&mut self) -> bool {
        let mut fired = Vec::new();
        self.fire(Event::ConnectButtonPressed, None, &mut fired);
        !fired.is_empty()
    }

    /// Operator reset: drop the session and start over.
    pub fn reset(&mut self) -> Transition {
        if let Some(mut communicator) = self
            .communicator
            .take()
        {
            communicator.close();
        }
        self.token = None;
        let mut fired = Vec::new();
        self.fire(Event::Reset, None, &mut fired);
        Transition {
            state: State::Discover,
            detail: None,
        }
    }

    /// Do the work of the current state once.
    ///
    /// Never fails: every error becomes a transition.
    pub fn step(
        &mut self,
        server: &mut dyn ServerCommunicator,
        factory: &dyn CommunicatorFactory,
    ) -> Vec<Transition> {
        let mut fired = Vec::new();
        match self.state {
            State::Discover => self.discover(factory, &mut fired),
            State::ConnectButtonIsPressed => self.register(server, &mut fired),
            State::WaitForCmd => self.poll(server, &mut fired),
            State::WaitUpload => self.fire(Event::UploadFinished, None, &mut fired),
            State::ErrorUploadToRobot => self.fire(Event::Resume, None, &mut fired),
            State::WaitForConnectButtonPress
            | State::WaitForServer
            | State::ErrorHttp
            | State::TokenTimeout => {},
        }
        fired
    }

    fn fire(&mut self, event: Event, detail: Option<String>, fired: &mut Vec<Transition>) {
        let next = self
            .state
            .next(event);
        if next == self.state && event != Event::Reset {
            debug!("{event:?} ignored in {}", self.state);
            return;
        }
        match &detail {
            Some(d) => info!("{} -> {next}: {d}", self.state),
            None => info!("{} -> {next}", self.state),
        }
        if next.is_fatal() {
            error!("{next} is only left through an operator reset");
        }
        self.state = next;
        fired.push(Transition {
            state: next,
            detail,
        });
    }

    fn discover(&mut self, factory: &dyn CommunicatorFactory, fired: &mut Vec<Transition>) {
        match factory.create(self.robot) {
            Ok(communicator) => {
                self.communicator = Some(communicator);
                self.fire(Event::CommunicatorReady, None, fired);
            },
            Err(e) => warn!("Cannot set up {} communicator: {e}", self.robot),
        }
    }

    fn request(&self, cmd: ServerCommand) -> Option<ServerRequest> {
        let device = self
            .communicator
            .as_ref()?
            .device_info();
        Some(ServerRequest {
            device,
            token: self
                .token
                .clone()?,
            cmd,
        })
    }

    fn register(&mut self, server: &mut dyn ServerCommunicator, fired: &mut Vec<Transition>) {
        let token = generate_token();
        self.token = Some(token.clone());
        self.fire(Event::TokenIssued, None, fired);

        let Some(request) = self.request(ServerCommand::Register) else {
            self.fire(Event::ServerFailed, Some("no robot connected".into()), fired);
            return;
        };
        match server.push_request(&request) {
            Ok(reply) => match reply.command() {
                Some(ServerCommand::Repeat) => {
                    info!("Robot registered with token {token}, waiting for commands");
                    self.fire(Event::Registered, None, fired);
                },
                Some(ServerCommand::Abort) => {
                    info!("Registration with token {token} timed out");
                    self.token = None;
                    self.fire(Event::RegistrationExpired, None, fired);
                    self.fire(Event::Restart, None, fired);
                },
                _ => {
                    error!("Unexpected command {} from server", reply.cmd);
                    self.fire(
                        Event::ServerFailed,
                        Some(format!("unexpected server command {}", reply.cmd)),
                        fired,
                    );
                },
            },
            Err(e) => {
                error!("Registration failed: {e}");
                self.fire(Event::ServerFailed, Some(e.to_string()), fired);
            },
        }
    }

    fn poll(&mut self, server: &mut dyn ServerCommunicator, fired: &mut Vec<Transition>) {
        let Some(request) = self.request(ServerCommand::Push) else {
            self.fire(Event::ServerFailed, Some("not paired".into()), fired);
            return;
        };
        let reply = match server.push_request(&request) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Polling failed: {e}");
                self.fire(Event::ServerFailed, Some(e.to_string()), fired);
                return;
            },
        };
        match reply.command() {
            Some(ServerCommand::Repeat) => {},
            Some(ServerCommand::Download) => {
                info!("Downloading user program");
                match server.download_program(&request) {
                    Ok(program) => self.deliver(&program, fired),
                    Err(e) => {
                        error!("Program download failed: {e}");
                        self.fire(Event::ServerFailed, Some(e.to_string()), fired);
                    },
                }
            },
            _ => warn!("Ignoring server command {} while paired", reply.cmd),
        }
    }

    /// Persist the program to a temporary file and upload it.
    fn deliver(&mut self, program: &Program, fired: &mut Vec<Transition>) {
        let request = match stage(program, self.robot) {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot stage program {}: {e}", program.name);
                self.fire(Event::UploadFailed, Some(e.user_message()), fired);
                self.fire(Event::Resume, None, fired);
                return;
            },
        };

        self.fire(Event::ProgramReceived, None, fired);
        let result = match self.communicator.as_mut() {
            Some(communicator) => communicator.upload(&request, &mut |_, _| {}),
            None => Err(Error::Protocol("no robot connected".into())),
        };
        if let Err(e) = result {
            warn!("Upload of {} failed: {e}", program.name);
            self.fire(Event::UploadFailed, Some(e.user_message()), fired);
            self.fire(Event::Resume, None, fired);
        }
    }
}

/// Write the program to a scoped temporary file and read it back as an
/// upload request. The file is removed when this returns.
fn stage(program: &Program, robot: RobotType) -> Result<UploadRequest> {
    let mut file = tempfile::Builder::new()
        .prefix("robolink-")
        .tempfile()?;
    file.write_all(&program.bytes)?;
    file.flush()?;
    let staged = UploadRequest::from_file(file.path(), robot)?;
    Ok(UploadRequest::new(staged.bytes().to_vec(), program.name.clone(), robot))
}
