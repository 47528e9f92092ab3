//! Wire protocols.
//!
//! - [`frame`] and [`scanner`]: mBot2 binary frames and their acknowledgments.
//! - [`command`] and [`response`]: SPIKE Hub JSON commands and their replies.

pub mod command;
pub mod frame;
pub mod response;
pub mod scanner;

pub use command::{Command, CorrelationIds, Mode, TransferState, chunk_payload};
pub use frame::{FrameKind, OutgoingFrame, encode_upload, xor32_checksum};
pub use response::{Response, ResponseMatcher};
pub use scanner::{Ack, FrameScanner};
