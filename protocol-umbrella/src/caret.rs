//! Caret binary framing.
//!
//! The newer binary framing. Carries the same logical fields as umbrella in
//! a more compact 20-byte minimum header, all integers big-endian:
//!
//! ```text
//! Byte/     0       |       1       |       2       |       3       |
//!   +---------------+---------------+---------------+---------------+
//!  0| Magic 0x5E    | Flags         | Header size                   |
//!   +---------------+---------------+---------------+---------------+
//!  4| Body size                                                     |
//!   +---------------+---------------+---------------+---------------+
//!  8| Type id                                                       |
//!   +---------------+---------------+---------------+---------------+
//! 12| Request id                                                    |
//!   |                                                               |
//!   +---------------+---------------+---------------+---------------+
//! ```
//!
//! Caret has no version field; incompatible revisions get a new magic byte.

use crate::error::ParseError;
use crate::frame::{FrameInfo, MAX_FRAME_SIZE};

/// Magic byte opening every caret frame (`'^'`).
pub const MAGIC: u8 = 0x5E;

/// Minimum (fixed-layout) header size.
pub const HEADER_SIZE: usize = 20;

/// Flags bit marking a reply frame.
pub const FLAG_REPLY: u8 = 0x01;

/// Parse a caret header from the front of `data`.
///
/// Pure function over the input: no mutation, no allocation. Returns
/// [`ParseError::Incomplete`] while fewer than [`HEADER_SIZE`] bytes are
/// available; any other error is fatal for the stream.
pub fn parse_header(data: &[u8]) -> Result<FrameInfo, ParseError> {
    if data.len() < HEADER_SIZE {
        return Err(ParseError::Incomplete);
    }
    if data[0] != MAGIC {
        return Err(ParseError::BadMagic(data[0]));
    }

    let flags = data[1];
    let header_size = u16::from_be_bytes([data[2], data[3]]) as u32;
    let body_size = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let type_id = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let request_id = u64::from_be_bytes([
        data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
    ]);

    if (header_size as usize) < HEADER_SIZE {
        return Err(ParseError::HeaderTooSmall {
            got: header_size,
            min: HEADER_SIZE as u32,
        });
    }
    let total = header_size as u64 + body_size as u64;
    if total > MAX_FRAME_SIZE as u64 {
        return Err(ParseError::FrameTooLarge { size: total });
    }

    Ok(FrameInfo {
        header_size,
        body_size,
        type_id,
        request_id,
        reply: flags & FLAG_REPLY != 0,
    })
}

/// Encode the fixed 20-byte header into `buf`.
///
/// The caller appends `info.header_size - 20` auxiliary header bytes and
/// the body. Returns [`HEADER_SIZE`].
///
/// # Panics
///
/// Panics if `buf` is shorter than [`HEADER_SIZE`], or if
/// `info.header_size` does not fit the 16-bit wire field.
pub fn encode_header(info: &FrameInfo, buf: &mut [u8]) -> usize {
    let header_size =
        u16::try_from(info.header_size).expect("caret header size exceeds 16-bit wire field");
    buf[0] = MAGIC;
    buf[1] = if info.reply { FLAG_REPLY } else { 0 };
    buf[2..4].copy_from_slice(&header_size.to_be_bytes());
    buf[4..8].copy_from_slice(&info.body_size.to_be_bytes());
    buf[8..12].copy_from_slice(&info.type_id.to_be_bytes());
    buf[12..20].copy_from_slice(&info.request_id.to_be_bytes());
    HEADER_SIZE
}
