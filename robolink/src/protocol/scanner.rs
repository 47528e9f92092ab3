//! Acknowledgment scanner for the mBot2 binary protocol.
//!
//! The controller answers every frame with a short acknowledgment frame,
//! but the bytes arrive in whatever bursts the USB bridge produces and are
//! often preceded by unrelated output. The scanner keeps a rolling buffer so
//! that an acknowledgment split across two reads is still recognized.
//!
//! ```text
//! offset:  0    1  2  3  4 .. 6   7      8  9   10       11   12
//!        +----+--------+--------+------+-----+--------+----+------+
//!        |0xF3| hdr/len| ids    | type | ... | status | cs | 0xF4 |
//!        +----+--------+--------+------+-----+--------+----+------+
//! ```
//!
//! The footer is checked at `start + 12`, making an acknowledgment 13 bytes
//! counting both markers. Firmware acknowledgments are laid out this way;
//! a 12-byte window would look for the footer on the checksum byte and
//! reject every real acknowledgment.

use std::time::Duration;

use log::trace;

use crate::clock::{Clock, Deadline};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::{FRAME_FOOTER, FRAME_HEADER};

/// Offset of the footer marker, counted from the start marker. Not the
/// frame length: see the module docs.
pub const ACK_FOOTER_OFFSET: usize = 12;

/// Bytes from start marker through footer.
pub const ACK_FRAME_LEN: usize = ACK_FOOTER_OFFSET + 1;

/// Offset of the response-type byte.
pub const ACK_TYPE_OFFSET: usize = 7;

/// Offset of the status byte in a generic acknowledgment.
pub const ACK_STATUS_OFFSET: usize = 10;

/// Response type of a generic acknowledgment.
pub const ACK_TYPE_GENERIC: u8 = 0xF0;

/// Response type of the upload-mode acknowledgment.
pub const ACK_TYPE_UPLOAD_MODE: u8 = 0x0D;

/// Status byte reporting success.
pub const ACK_STATUS_OK: u8 = 0x00;

/// Size of one read from the port.
pub const READ_BURST: usize = 64;

/// Default deadline for one acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome carried by an acknowledgment frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The controller accepted the frame.
    Accepted,
    /// The controller reported a failure status.
    Rejected(u8),
}

impl Ack {
    /// Classify a complete candidate frame, or `None` if it is not an
    /// acknowledgment.
    pub fn classify(candidate: &[u8]) -> Option<Self> {
        if candidate.len() < ACK_FRAME_LEN
            || candidate[0] != FRAME_HEADER
            || candidate[ACK_FOOTER_OFFSET] != FRAME_FOOTER
        {
            return None;
        }
        match candidate[ACK_TYPE_OFFSET] {
            ACK_TYPE_GENERIC => match candidate[ACK_STATUS_OFFSET] {
                ACK_STATUS_OK => Some(Self::Accepted),
                status => Some(Self::Rejected(status)),
            },
            ACK_TYPE_UPLOAD_MODE => Some(Self::Accepted),
            _ => None,
        }
    }
}

/// Incremental acknowledgment finder.
#[derive(Debug, Default)]
pub struct FrameScanner {
    buffer: Vec<u8>,
}

impl FrameScanner {
    /// Create an empty scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes retained as a possible start of an acknowledgment.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Feed one burst; returns the first acknowledgment completed by it.
    ///
    /// Bytes before a start marker are dropped. A marker too close to the
    /// end of the data is retained for the next burst. Candidates that do
    /// not validate are skipped and scanning resumes at the next marker.
    pub fn push(&mut self, burst: &[u8]) -> Option<Ack> {
        self.buffer
            .extend_from_slice(burst);

        let mut pos = 0;
        while let Some(rel) = self.buffer[pos..]
            .iter()
            .position(|&b| b == FRAME_HEADER)
        {
            let start = pos + rel;
            if self.buffer.len() - start < ACK_FRAME_LEN {
                self.buffer
                    .drain(..start);
                return None;
            }
            if let Some(ack) = Ack::classify(&self.buffer[start..start + ACK_FRAME_LEN]) {
                self.buffer
                    .drain(..start + ACK_FRAME_LEN);
                return Some(ack);
            }
            pos = start + 1;
        }

        self.buffer
            .clear();
        None
    }
}

/// Wait for the acknowledgment of the frame just written.
///
/// Returns `Ok(())` on a positive acknowledgment, [`Error::Nack`] on an
/// explicit failure status and [`Error::NoResponse`] once `timeout` passes.
pub fn await_ack<P, C>(
    port: &mut P,
    clock: &C,
    timeout: Duration,
    poll_interval: Duration,
    what: &str,
) -> Result<()>
where
    P: Port + ?Sized,
    C: Clock + ?Sized,
{
    let deadline = Deadline::after(clock, timeout);
    let mut scanner = FrameScanner::new();
    let mut burst = [0u8; READ_BURST];

    loop {
        let n = port.read_available(&mut burst)?;
        if n > 0 {
            trace!("<< {:02X?}", &burst[..n]);
            match scanner.push(&burst[..n]) {
                Some(Ack::Accepted) => return Ok(()),
                Some(Ack::Rejected(status)) => {
                    return Err(Error::Nack(format!("{what} (status 0x{status:02X})")));
                },
                None => {},
            }
        }
        if deadline.is_expired(clock) {
            return Err(Error::NoResponse(format!(
                "no acknowledgment for {what} within {} ms",
                timeout.as_millis()
            )));
        }
        if n == 0 {
            clock.sleep(poll_interval);
        }
    }
}
