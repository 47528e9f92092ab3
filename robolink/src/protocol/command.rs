//! SPIKE Hub JSON command protocol.
//!
//! Every command is one JSON object terminated by a carriage return:
//!
//! ```text
//! {"m":"start_write_program","p":{"slotid":0,"size":1024,"meta":{...}},"i":"a1B2"}\r
//! ```
//!
//! `i` is a short correlation id echoed back in the hub's reply. A program
//! is written as base64 text, split into `write_package` commands that each
//! carry the transfer id handed out by the previous reply.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::Result;

/// Terminator appended to every serialized command.
pub const COMMAND_TERMINATOR: u8 = 0x0D;

/// Length of a correlation id.
pub const ID_LEN: usize = 4;

/// Maximum number of encoded characters per `write_package`.
pub const MAX_PACKAGE_CHARS: usize = 512;

/// Slot the uploaded program is stored in.
pub const DEFAULT_SLOT: u8 = 0;

/// Program name shown in the hub's slot list.
pub const PROGRAM_NAME: &str = "NEPOprog";

/// Project id attached to uploaded programs.
pub const PROJECT_ID: &str = "50uN1ZaRpHj2";

/// Command modes understood by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Stop whatever program is running.
    ProgramTerminate,
    /// Announce a program upload into a slot.
    StartWriteProgram,
    /// Write one chunk of the announced program.
    WritePackage,
    /// Start the program stored in a slot.
    ProgramExecute,
}

impl Mode {
    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProgramTerminate => "program_terminate",
            Self::StartWriteProgram => "start_write_program",
            Self::WritePackage => "write_package",
            Self::ProgramExecute => "program_execute",
        }
    }
}

/// One correlated command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// Mode.
    #[serde(rename = "m")]
    pub mode: Mode,
    /// Parameters.
    #[serde(rename = "p")]
    pub params: Value,
    /// Correlation id.
    #[serde(rename = "i")]
    pub id: String,
}

impl Command {
    /// Create a command with the given id.
    pub fn new(mode: Mode, params: Value, id: impl Into<String>) -> Self {
        Self {
            mode,
            params,
            id: id.into(),
        }
    }

    /// Serialize to the bytes written on the wire, terminator included.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(COMMAND_TERMINATOR);
        Ok(bytes)
    }
}

/// Metadata stored with a program slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramMeta {
    /// Creation time, seconds since the epoch.
    pub created: i64,
    /// Modification time, seconds since the epoch.
    pub modified: i64,
    /// Program name.
    pub name: String,
    /// Program language.
    #[serde(rename = "type")]
    pub kind: String,
    /// Project id.
    pub project_id: String,
}

impl ProgramMeta {
    /// Metadata for a Python program written at `now`.
    pub fn python(now: i64) -> Self {
        Self {
            created: now,
            modified: now,
            name: PROGRAM_NAME.to_string(),
            kind: "python".to_string(),
            project_id: PROJECT_ID.to_string(),
        }
    }
}

/// Parameters of `program_terminate`.
pub fn terminate_params() -> Value {
    json!({})
}

/// Parameters of `start_write_program`.
pub fn start_write_params(slot: u8, encoded_size: usize, meta: &ProgramMeta) -> Value {
    json!({
        "slotid": slot,
        "size": encoded_size,
        "meta": meta,
    })
}

/// Parameters of `write_package`.
pub fn write_package_params(data: &str, transfer_id: &str) -> Value {
    json!({
        "data": data,
        "transferid": transfer_id,
    })
}

/// Parameters of `program_execute`.
pub fn execute_params(slot: u8) -> Value {
    json!({ "slotid": slot })
}

/// Issues correlation ids that are unique among outstanding commands.
#[derive(Debug, Default)]
pub struct CorrelationIds {
    outstanding: HashSet<String>,
}

impl CorrelationIds {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh 4-character alphanumeric id and mark it outstanding.
    pub fn issue(&mut self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect();
            if self
                .outstanding
                .insert(id.clone())
            {
                return id;
            }
        }
    }

    /// Mark `id` as answered (or abandoned).
    pub fn release(&mut self, id: &str) {
        self.outstanding
            .remove(id);
    }

    /// Number of ids awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.outstanding
            .len()
    }
}

/// One `write_package` payload slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageChunk<'a> {
    /// Offset into the encoded payload.
    pub offset: usize,
    /// Encoded characters.
    pub data: &'a str,
}

/// Split an encoded payload into chunks of at most `max_chars` characters.
///
/// The payload is base64, so every character is one byte and any byte
/// offset is a valid split point.
pub fn chunk_payload(encoded: &str, max_chars: usize) -> Vec<PackageChunk<'_>> {
    let step = max_chars.max(1);
    (0..encoded.len())
        .step_by(step)
        .map(|offset| PackageChunk {
            offset,
            data: &encoded[offset..(offset + step).min(encoded.len())],
        })
        .collect()
}

/// Progress of one program transfer.
#[derive(Debug, Clone)]
pub struct TransferState {
    payload: Vec<u8>,
    encoded: String,
    cursor: usize,
    transfer_id: Option<String>,
}

impl TransferState {
    /// Encode `payload` and start at offset zero.
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            encoded: Base64Standard.encode(payload),
            cursor: 0,
            transfer_id: None,
        }
    }

    /// Raw program bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Base64 form of the program.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Length of the encoded payload, as announced to the hub.
    pub fn encoded_len(&self) -> usize {
        self.encoded
            .len()
    }

    /// Offset of the next unsent character.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Transfer id to send with the next chunk.
    pub fn transfer_id(&self) -> Option<&str> {
        self.transfer_id
            .as_deref()
    }

    /// Whether every chunk has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.encoded.len()
    }

    /// Chunks still to be sent.
    pub fn remaining_chunks(&self, max_chars: usize) -> Vec<PackageChunk<'_>> {
        chunk_payload(&self.encoded[self.cursor..], max_chars)
            .into_iter()
            .map(|chunk| PackageChunk {
                offset: self.cursor + chunk.offset,
                data: chunk.data,
            })
            .collect()
    }

    /// Record a transfer id from the hub. `None` keeps the current one.
    pub fn rotate(&mut self, transfer_id: Option<String>) {
        if let Some(id) = transfer_id {
            self.transfer_id = Some(id);
        }
    }

    /// Move the cursor past an acknowledged chunk.
    pub fn advance(&mut self, chars: usize) {
        self.cursor = (self.cursor + chars).min(self.encoded.len());
    }
}
