//! Umbrella binary framing.
//!
//! The original binary framing for routing traffic. Every frame begins with
//! a fixed-layout header of at least 24 bytes, all integers big-endian:
//!
//! ```text
//! Byte/     0       |       1       |       2       |       3       |
//!   +---------------+---------------+---------------+---------------+
//!  0| Magic 0x7D    | Version       | Flags                         |
//!   +---------------+---------------+---------------+---------------+
//!  4| Type id                                                       |
//!   +---------------+---------------+---------------+---------------+
//!  8| Request id                                                    |
//!   |                                                               |
//!   +---------------+---------------+---------------+---------------+
//! 16| Header size                                                   |
//!   +---------------+---------------+---------------+---------------+
//! 20| Body size                                                     |
//!   +---------------+---------------+---------------+---------------+
//! ```
//!
//! `Header size` counts the full header including any auxiliary bytes that
//! follow the fixed 24; frame delimiting skips the auxiliary region without
//! interpreting it.

use crate::error::ParseError;
use crate::frame::{FrameInfo, MAX_FRAME_SIZE};

/// Magic byte opening every umbrella frame (`'}'`).
pub const MAGIC: u8 = 0x7D;

/// The single umbrella version this implementation speaks.
pub const VERSION: u8 = 1;

/// Minimum (fixed-layout) header size.
pub const HEADER_SIZE: usize = 24;

/// Flags bit marking a reply frame.
pub const FLAG_REPLY: u16 = 0x0001;

/// Parse an umbrella header from the front of `data`.
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
    if data[1] != VERSION {
        return Err(ParseError::BadVersion(data[1]));
    }

    let flags = u16::from_be_bytes([data[2], data[3]]);
    let type_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let request_id = u64::from_be_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);
    let header_size = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let body_size = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);

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

/// Encode the fixed 24-byte header into `buf`.
///
/// The caller appends `info.header_size - 24` auxiliary header bytes and
/// the body. Returns [`HEADER_SIZE`].
///
/// # Panics
///
/// Panics if `buf` is shorter than [`HEADER_SIZE`].
pub fn encode_header(info: &FrameInfo, buf: &mut [u8]) -> usize {
    let flags: u16 = if info.reply { FLAG_REPLY } else { 0 };
    buf[0] = MAGIC;
    buf[1] = VERSION;
    buf[2..4].copy_from_slice(&flags.to_be_bytes());
    buf[4..8].copy_from_slice(&info.type_id.to_be_bytes());
    buf[8..16].copy_from_slice(&info.request_id.to_be_bytes());
    buf[16..20].copy_from_slice(&info.header_size.to_be_bytes());
    buf[20..24].copy_from_slice(&info.body_size.to_be_bytes());
    HEADER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameInfo {
        FrameInfo {
            header_size: HEADER_SIZE as u32,
            body_size: 512,
            type_id: 0x1234,
            request_id: 0xDEAD_BEEF_0042,
            reply: false,
        }
    }

    #[test]
    fn encode_parse_round_trip() {
        let mut info = sample();
        info.reply = true;

        let mut buf = [0u8; HEADER_SIZE];
        assert_eq!(encode_header(&info, &mut buf), HEADER_SIZE);

        let parsed = parse_header(&buf).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn incomplete_below_minimum() {
        let mut buf = [0u8; HEADER_SIZE];
        encode_header(&sample(), &mut buf);
        for len in 0..HEADER_SIZE {
            assert_eq!(parse_header(&buf[..len]), Err(ParseError::Incomplete));
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = [0u8; HEADER_SIZE];
        encode_header(&sample(), &mut buf);
        buf[0] = 0x01;
        assert_eq!(parse_header(&buf), Err(ParseError::BadMagic(0x01)));
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = [0u8; HEADER_SIZE];
        encode_header(&sample(), &mut buf);
        buf[1] = 9;
        assert_eq!(parse_header(&buf), Err(ParseError::BadVersion(9)));
    }

    #[test]
    fn rejects_header_size_below_minimum() {
        let mut info = sample();
        info.header_size = 8;
        let mut buf = [0u8; HEADER_SIZE];
        encode_header(&info, &mut buf);
        assert_eq!(
            parse_header(&buf),
            Err(ParseError::HeaderTooSmall {
                got: 8,
                min: HEADER_SIZE as u32
            })
        );
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut info = sample();
        info.body_size = u32::MAX;
        let mut buf = [0u8; HEADER_SIZE];
        encode_header(&info, &mut buf);
        assert!(matches!(
            parse_header(&buf),
            Err(ParseError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn auxiliary_header_bytes_allowed() {
        let mut info = sample();
        info.header_size = HEADER_SIZE as u32 + 16;
        let mut buf = [0u8; HEADER_SIZE];
        encode_header(&info, &mut buf);
        let parsed = parse_header(&buf).unwrap();
        assert_eq!(parsed.header_size, 40);
        assert_eq!(parsed.total_size(), 40 + 512);
    }
}
