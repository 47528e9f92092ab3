//! Reply matching for the SPIKE Hub JSON protocol.
//!
//! The hub streams JSON objects: replies to our commands, echoes of those
//! commands and unsolicited status messages (sensor readings, battery
//! level). Only the object whose `i` equals the outstanding correlation id
//! is a reply; everything else is dropped.
//!
//! Objects are found by balanced-brace scanning rather than by line
//! splitting, since the hub does not always terminate unsolicited messages.
//! A carriage return inside an open object resynchronizes the scan, so a
//! stray `{` in REPL output cannot swallow the replies behind it.

use std::time::Duration;

use log::{debug, trace};
use serde_json::Value;

use crate::clock::{Clock, Deadline};
use crate::error::{Error, Result};
use crate::port::Port;

/// Bytes requested per read.
pub const RESPONSE_READ: usize = 512;

/// Default deadline for one command round-trip.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause between empty reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A successful reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Correlation id of the answered command.
    pub id: String,
    /// The `r` member, `Null` if absent.
    pub result: Value,
    /// Transfer id carried by the reply, if any.
    pub transfer_id: Option<String>,
}

impl Response {
    fn from_object(id: &str, object: &Value) -> Self {
        let result = object
            .get("r")
            .cloned()
            .unwrap_or(Value::Null);
        let transfer_id = result
            .get("transferid")
            .or_else(|| object.get("transferid"))
            .and_then(token_string);
        Self {
            id: id.to_string(),
            result,
            transfer_id,
        }
    }
}

fn token_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accumulates hub output and extracts complete JSON objects.
#[derive(Debug, Default)]
pub struct ResponseMatcher {
    text: String,
    carry: Vec<u8>,
}

impl ResponseMatcher {
    /// Create an empty matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Text received but not yet consumed.
    pub fn buffered(&self) -> &str {
        &self.text
    }

    /// Drop everything buffered.
    pub fn reset(&mut self) {
        self.text
            .clear();
        self.carry
            .clear();
    }

    /// Append raw bytes.
    ///
    /// Invalid sequences become U+FFFD. A multi-byte character cut off at
    /// the end of `bytes` is held back until the rest arrives.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.carry
            .extend_from_slice(bytes);
        let mut input = std::mem::take(&mut self.carry);

        loop {
            match std::str::from_utf8(&input) {
                Ok(s) => {
                    self.text
                        .push_str(s);
                    return;
                },
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&input[..valid]));
                    match e.error_len() {
                        None => {
                            self.carry = input[valid..].to_vec();
                            return;
                        },
                        Some(len) => {
                            self.text
                                .push(char::REPLACEMENT_CHARACTER);
                            input.drain(..valid + len);
                        },
                    }
                },
            }
        }
    }

    /// Consume buffered objects until the reply for `id` is found.
    ///
    /// Returns `None` if no complete reply is buffered yet. An incomplete
    /// trailing object stays buffered. A candidate cut off by a carriage
    /// return, or one that does not parse, is dropped up to its opening
    /// brace so that scanning resumes at the next one.
    pub fn take_reply(&mut self, id: &str) -> Option<Result<Response>> {
        loop {
            let (start, end) = match next_object(&self.text) {
                Scan::Object { start, end } => (start, end),
                Scan::Broken { start } => {
                    debug!("Dropping unterminated hub output: {:?}", &self.text[..start + 1]);
                    self.text
                        .drain(..=start);
                    continue;
                },
                Scan::Incomplete => break,
            };

            let object: Value = match serde_json::from_str(&self.text[start..end]) {
                Ok(v @ Value::Object(_)) => v,
                Ok(_) | Err(_) => {
                    debug!("Skipping unparsable hub output: {}", &self.text[start..end]);
                    self.text
                        .drain(..=start);
                    continue;
                },
            };
            let candidate: String = self
                .text
                .drain(..end)
                .skip(start)
                .collect();

            if object
                .get("m")
                .is_some()
            {
                trace!("Skipping hub message: {candidate}");
                continue;
            }

            if object
                .get("i")
                .and_then(Value::as_str)
                != Some(id)
            {
                debug!("Response while waiting for {id}: {candidate}");
                continue;
            }

            if let Some(error) = object.get("e") {
                return Some(Err(Error::Nack(format!("command {id}: {error}"))));
            }
            return Some(Ok(Response::from_object(id, &object)));
        }

        // Nothing but noise before the next opening brace.
        match self.text.find('{') {
            Some(start) => {
                self.text
                    .drain(..start);
            },
            None => self
                .text
                .clear(),
        }
        None
    }
}

/// Outcome of scanning for the next object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// A balanced object spans `start..end`.
    Object { start: usize, end: usize },
    /// The brace at `start` was never closed before a carriage return.
    Broken { start: usize },
    /// No opening brace, or an object still waiting for more input.
    Incomplete,
}

/// Locate the first complete top-level `{...}` object in `text`.
///
/// Braces inside string literals are ignored. Every object the hub sends
/// ends its line with a carriage return, and JSON never contains a raw one,
/// so a CR seen while an object is open means the brace was noise.
fn next_object(text: &str) -> Scan {
    let Some(start) = text.find('{') else {
        return Scan::Incomplete;
    };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if c == '\r' {
            return Scan::Broken { start };
        }
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {},
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Scan::Object {
                        start,
                        end: start + i + 1,
                    };
                }
            },
            _ => {},
        }
    }
    Scan::Incomplete
}

/// Read from `port` until the reply for `id` arrives.
///
/// An error reply yields [`Error::Nack`]; no reply within `timeout` yields
/// [`Error::NoResponse`].
pub fn await_response<P, C>(
    port: &mut P,
    clock: &C,
    matcher: &mut ResponseMatcher,
    id: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Response>
where
    P: Port + ?Sized,
    C: Clock + ?Sized,
{
    let deadline = Deadline::after(clock, timeout);
    let mut buf = [0u8; RESPONSE_READ];

    loop {
        if let Some(reply) = matcher.take_reply(id) {
            return reply;
        }
        let n = port.read_available(&mut buf)?;
        if n > 0 {
            trace!("<< {}", String::from_utf8_lossy(&buf[..n]));
            matcher.push_bytes(&buf[..n]);
            continue;
        }
        if deadline.is_expired(clock) {
            return Err(Error::NoResponse(format!(
                "no reply to command {id} within {} s",
                timeout.as_secs()
            )));
        }
        clock.sleep(poll_interval);
    }
}
