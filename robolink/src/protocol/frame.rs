//! mBot2 binary upload frames.
//!
//! ## Outer Frame Format
//!
//! ```text
//! +------+-----------+------+------+----------------------+---------+------+
//! | 0xF3 | HdrSum    | Len1 | Len2 |    Upload frame      | DataSum | 0xF4 |
//! +------+-----------+------+------+----------------------+---------+------+
//! |  1   |    1      |  1   |  1   |       Len bytes      |    1    |  1   |
//! +------+-----------+------+------+----------------------+---------+------+
//! HdrSum  = (0xF3 + Len1 + Len2) mod 256
//! DataSum = sum(upload frame) mod 256
//! ```
//!
//! The upload frame is `0x01 0x00 0x5E` (protocol, device, service) followed
//! by an instruction: `id, dataLen, 0x00, data`. Instruction `0x01` announces
//! the file, instruction `0x02` carries one block of it.

use byteorder::{LittleEndian, WriteBytesExt};

/// Start-of-frame marker.
pub const FRAME_HEADER: u8 = 0xF3;

/// End-of-frame marker.
pub const FRAME_FOOTER: u8 = 0xF4;

/// Protocol id of file upload frames.
pub const PROTOCOL_ID: u8 = 0x01;

/// Device id of file upload frames.
pub const DEVICE_ID: u8 = 0x00;

/// Service id of the on-board file service.
pub const SERVICE_ID: u8 = 0x5E;

/// Switches the controller into upload mode.
pub const ENTER_UPLOAD_MODE: [u8; 9] = [0xF3, 0xF6, 0x03, 0x00, 0x0D, 0x00, 0x00, 0x0D, 0xF4];

/// Default size of one file block; the controller's receive buffer holds
/// 128 data bytes per instruction.
pub const DEFAULT_MAX_BLOCK: usize = 128;

/// Largest block that still fits the one-byte instruction length.
pub const MAX_BLOCK_LIMIT: usize = u8::MAX as usize - 4;

/// File type byte for a plain file.
const FILE_TYPE_FILE: u8 = 0x00;

/// Prefix of script-execution frames: protocol 0x28, service 0x04, index 0.
const SCRIPT_PREFIX: [u8; 4] = [0x28, 0x04, 0x00, 0x00];

/// Scripts that switch off REPL echo before an upload.
const QUIET_REPL_SCRIPTS: [&str; 2] = [
    "try:\n    import config\nexcept:\n    pass",
    "try:\n    config.write_config(\"repl_enable\", False)\nexcept:\n    pass",
];

/// Upload instruction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    /// File header: type, size, checksum, name.
    FileHeader = 0x01,
    /// File block: offset and data.
    FileBlock = 0x02,
}

/// What an outgoing frame does, for logging and progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The fixed "enter upload mode" command.
    EnterUploadMode,
    /// A REPL configuration script.
    Script,
    /// The file header.
    FileHeader,
    /// A file block starting at `offset` with `len` data bytes.
    FileBlock {
        /// Byte offset of the block inside the file.
        offset: usize,
        /// Number of file bytes in the block.
        len: usize,
    },
}

/// One buffer to transmit, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    /// Frame purpose.
    pub kind: FrameKind,
    /// Bytes on the wire.
    pub bytes: Vec<u8>,
}

/// 4-byte XOR checksum over the file.
///
/// Byte `i` is folded into lane `i mod 4`, so a trailing partial group only
/// touches the low lanes.
pub fn xor32_checksum(data: &[u8]) -> [u8; 4] {
    let mut lanes = [0u8; 4];
    for (i, byte) in data.iter().enumerate() {
        lanes[i % 4] ^= byte;
    }
    lanes
}

/// Sum of `bytes` modulo 256.
pub fn sum_checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Wrap an upload frame in the outer header, checksums and footer.
#[allow(clippy::cast_possible_truncation)]
pub fn wrap_outer(upload_frame: &[u8]) -> Vec<u8> {
    let size = upload_frame.len();
    let len1 = (size % 256) as u8;
    let len2 = (size / 256) as u8;

    let mut buf = Vec::with_capacity(size + 6);
    buf.push(FRAME_HEADER);
    buf.push(
        FRAME_HEADER
            .wrapping_add(len1)
            .wrapping_add(len2),
    );
    buf.push(len1);
    buf.push(len2);
    buf.extend_from_slice(upload_frame);
    buf.push(sum_checksum(upload_frame));
    buf.push(FRAME_FOOTER);
    buf
}

/// Build a complete file-service frame for one instruction.
#[allow(clippy::cast_possible_truncation)]
pub fn instruction_frame(instruction: Instruction, data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= u8::MAX as usize);

    let mut upload = Vec::with_capacity(6 + data.len());
    upload.extend_from_slice(&[PROTOCOL_ID, DEVICE_ID, SERVICE_ID]);
    upload.push(instruction as u8);
    upload.push(data.len() as u8);
    upload.push(0x00);
    upload.extend_from_slice(data);
    wrap_outer(&upload)
}

/// Build the file header frame.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn header_frame(file: &[u8], target_path: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(9 + target_path.len());
    data.push(FILE_TYPE_FILE);
    data.write_u32::<LittleEndian>(file.len() as u32)
        .unwrap();
    data.extend_from_slice(&xor32_checksum(file));
    data.extend_from_slice(target_path.as_bytes());
    instruction_frame(Instruction::FileHeader, &data)
}

/// Offsets and lengths of the blocks a file is split into.
///
/// `max_block` is clamped to `1..=MAX_BLOCK_LIMIT`, the most a block frame's
/// one-byte length field can describe.
pub fn block_spans(file_len: usize, max_block: usize) -> impl Iterator<Item = (usize, usize)> {
    let step = max_block.clamp(1, MAX_BLOCK_LIMIT);
    (0..file_len)
        .step_by(step)
        .map(move |offset| (offset, step.min(file_len - offset)))
}

/// Build the block frame for `file[offset..offset + len]`.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn block_frame(file: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + len);
    data.write_u32::<LittleEndian>(offset as u32)
        .unwrap();
    data.extend_from_slice(&file[offset..offset + len]);
    instruction_frame(Instruction::FileBlock, &data)
}

/// Build a frame that runs a short Python script on the controller.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn script_frame(script: &str) -> Vec<u8> {
    let mut upload = Vec::with_capacity(6 + script.len());
    upload.extend_from_slice(&SCRIPT_PREFIX);
    upload
        .write_u16::<LittleEndian>(script.len() as u16)
        .unwrap();
    upload.extend_from_slice(script.as_bytes());
    wrap_outer(&upload)
}

/// Encode a complete upload: preamble, header, then one frame per block.
///
/// With `quiet_repl` set, the preamble and the REPL scripts are sent twice
/// before the header so that REPL output cannot interleave with the
/// acknowledgments.
pub fn encode_upload(
    file: &[u8],
    target_path: &str,
    max_block: usize,
    quiet_repl: bool,
) -> Vec<OutgoingFrame> {
    let mut frames = Vec::new();

    let rounds = if quiet_repl { 2 } else { 1 };
    for _ in 0..rounds {
        frames.push(OutgoingFrame {
            kind: FrameKind::EnterUploadMode,
            bytes: ENTER_UPLOAD_MODE.to_vec(),
        });
        if quiet_repl {
            for script in QUIET_REPL_SCRIPTS {
                frames.push(OutgoingFrame {
                    kind: FrameKind::Script,
                    bytes: script_frame(script),
                });
            }
        }
    }

    frames.push(OutgoingFrame {
        kind: FrameKind::FileHeader,
        bytes: header_frame(file, target_path),
    });

    for (offset, len) in block_spans(file.len(), max_block) {
        frames.push(OutgoingFrame {
            kind: FrameKind::FileBlock { offset, len },
            bytes: block_frame(file, offset, len),
        });
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_xor32_full_groups() {
        let data = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80];
        assert_eq!(xor32_checksum(&data), [0x11, 0x22, 0x44, 0x88]);
    }

    #[test]
    fn test_xor32_trailing_partial_group_hits_low_lanes() {
        let data = [0xFF, 0x00, 0x00, 0x00, 0x0F, 0xF0];
        assert_eq!(xor32_checksum(&data), [0xF0, 0xF0, 0x00, 0x00]);
        assert_eq!(xor32_checksum(&[]), [0, 0, 0, 0]);
    }

    #[test]
    fn test_xor32_order_independent_within_lane() {
        let a = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        // Swap the two groups: every lane sees the same bytes.
        let b = [0x9A, 0xBC, 0xDE, 0xF0, 0x12, 0x34, 0x56, 0x78];
        assert_eq!(xor32_checksum(&a), xor32_checksum(&b));
        assert_eq!(xor32_checksum(&a), xor32_checksum(&a));
    }

    #[test]
    fn test_wrap_outer_reproduces_enter_upload_mode() {
        assert_eq!(wrap_outer(&[0x0D, 0x00, 0x00]), ENTER_UPLOAD_MODE.to_vec());
    }

    #[test]
    fn test_wrap_outer_checksums() {
        let upload = vec![0xAA; 300];
        let frame = wrap_outer(&upload);

        assert_eq!(frame[0], FRAME_HEADER);
        assert_eq!(frame[2], 44); // 300 % 256
        assert_eq!(frame[3], 1); // 300 / 256
        assert_eq!(frame[1], 0xF3u8.wrapping_add(44).wrapping_add(1));
        assert_eq!(frame[frame.len() - 2], ((0xAAusize * 300) % 256) as u8);
        assert_eq!(frame[frame.len() - 1], FRAME_FOOTER);
        assert_eq!(frame.len(), 300 + 6);
    }

    #[test]
    fn test_length_field_matches_payload() {
        let frame = block_frame(&[7u8; 50], 10, 20);
        let len = u16::from_le_bytes([frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 6);
    }

    #[test]
    fn test_header_frame_layout() {
        let file = b"print('hi')\n";
        let frame = header_frame(file, "/flash/main.py");

        // Outer header (4) + protocol/device/service (3)
        assert_eq!(&frame[4..7], &[0x01, 0x00, 0x5E]);
        assert_eq!(frame[7], Instruction::FileHeader as u8);
        assert_eq!(frame[8] as usize, 9 + "/flash/main.py".len());
        assert_eq!(frame[9], 0x00);
        // File type, size, checksum, name
        assert_eq!(frame[10], 0x00);
        assert_eq!(&frame[11..15], &(file.len() as u32).to_le_bytes());
        assert_eq!(&frame[15..19], &xor32_checksum(file));
        assert_eq!(&frame[19..frame.len() - 2], b"/flash/main.py");
    }

    #[test]
    fn test_block_frame_layout() {
        let file: Vec<u8> = (0..=255).collect();
        let frame = block_frame(&file, 128, 4);

        assert_eq!(frame[7], Instruction::FileBlock as u8);
        assert_eq!(frame[8], 8);
        assert_eq!(frame[9], 0x00);
        assert_eq!(&frame[10..14], &128u32.to_le_bytes());
        assert_eq!(&frame[14..18], &[128, 129, 130, 131]);
    }

    #[test]
    fn test_block_spans_example_130_bytes() {
        let spans: Vec<_> = block_spans(130, 64).collect();
        assert_eq!(spans, vec![(0, 64), (64, 64), (128, 2)]);
    }

    #[test]
    fn test_oversized_block_is_clamped() {
        let file = vec![0xAA; 600];
        let frames = encode_upload(&file, "/flash/main.py", 4096, false);
        let blocks: Vec<_> = frames
            .iter()
            .filter_map(|f| match f.kind {
                FrameKind::FileBlock { len, .. } => Some((len, &f.bytes)),
                _ => None,
            })
            .collect();

        assert_eq!(
            blocks
                .iter()
                .map(|(len, _)| *len)
                .collect::<Vec<_>>(),
            vec![MAX_BLOCK_LIMIT, MAX_BLOCK_LIMIT, 600 - 2 * MAX_BLOCK_LIMIT]
        );
        for (len, bytes) in blocks {
            // Instruction data is the 4-byte offset plus the block.
            assert_eq!(usize::from(bytes[8]), 4 + len);
            assert_eq!(bytes.len(), 4 + 6 + 4 + len + 2);
        }
    }

    #[test]
    fn test_block_spans_partition_file() {
        for size in [0usize, 1, 63, 64, 65, 127, 128, 129, 1000] {
            for max in [1usize, 7, 64, 128] {
                let mut expected = 0;
                for (offset, len) in block_spans(size, max) {
                    assert_eq!(offset, expected, "gap or overlap at size {size}");
                    assert!(len > 0 && len <= max);
                    expected += len;
                }
                assert_eq!(expected, size);
            }
        }
    }

    #[test]
    fn test_encode_upload_order() {
        let file = vec![0x55; 130];
        let frames = encode_upload(&file, "/flash/main.py", 64, false);

        let kinds: Vec<_> = frames.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FrameKind::EnterUploadMode,
                FrameKind::FileHeader,
                FrameKind::FileBlock { offset: 0, len: 64 },
                FrameKind::FileBlock { offset: 64, len: 64 },
                FrameKind::FileBlock { offset: 128, len: 2 },
            ]
        );
    }

    #[test]
    fn test_encode_upload_empty_file_has_no_blocks() {
        let frames = encode_upload(&[], "/flash/main.py", 64, false);
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_quiet_repl_frames_match_known_captures() {
        let frames = encode_upload(b"x", "/flash/main.py", 64, true);
        let scripts: Vec<_> = frames
            .iter()
            .filter(|f| f.kind == FrameKind::Script)
            .collect();
        assert_eq!(scripts.len(), 4);
        assert_eq!(
            scripts[0].bytes,
            hex(
                "f3202d002804000027007472793a0a20202020696d706f727420636f6e6669670a6578636570743a0a2020202070617373b5f4"
            )
        );
        assert_eq!(
            scripts[1].bytes,
            hex(
                "f33c49002804000043007472793a0a20202020636f6e6669672e77726974655f636f6e66696728227265706c5f656e61626c65222c2046616c7365290a6578636570743a0a202020207061737389f4"
            )
        );
        assert_eq!(frames[0].kind, FrameKind::EnterUploadMode);
        assert_eq!(frames[3].kind, FrameKind::EnterUploadMode);
    }
}
