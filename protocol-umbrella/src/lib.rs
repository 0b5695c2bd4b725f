//! Wire framings for memcached routing traffic.
//!
//! This crate provides header parsing and encoding for the two binary
//! framings a routing proxy speaks with its clients, plus first-byte
//! protocol detection:
//!
//! - *Umbrella*: the original binary framing. Fixed 24-byte header carrying
//!   header size, body size, a message type id, a request id, and a reply
//!   flag.
//! - *Caret*: the newer binary framing. Same logical fields, different
//!   layout, 20-byte minimum header with a distinct magic byte.
//! - *ASCII*: the line-oriented memcached text protocol. This crate only
//!   classifies it from the first byte; command parsing lives with the
//!   connection owner.
//!
//! Both binary framings are self-describing: the header declares its own
//! size and the body size, so a stream parser never has to interpret body
//! bytes to find the next frame boundary.
//!
//! # Example
//!
//! ```
//! use protocol_umbrella::{umbrella, FrameInfo};
//!
//! let info = FrameInfo {
//!     header_size: umbrella::HEADER_SIZE as u32,
//!     body_size: 8,
//!     type_id: 21,
//!     request_id: 7,
//!     reply: false,
//! };
//!
//! let mut buf = [0u8; umbrella::HEADER_SIZE];
//! umbrella::encode_header(&info, &mut buf);
//!
//! let parsed = umbrella::parse_header(&buf).unwrap();
//! assert_eq!(parsed, info);
//! ```

pub mod caret;
mod detect;
mod error;
mod frame;
pub mod umbrella;

pub use detect::{determine_protocol, is_ascii_command_start, Protocol};
pub use error::ParseError;
pub use frame::{FrameInfo, MAX_FRAME_SIZE};
