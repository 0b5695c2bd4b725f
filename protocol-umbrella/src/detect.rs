//! Protocol detection from the first byte of a connection.
//!
//! The three protocols are distinguishable from a single byte: both binary
//! framings open with a magic byte, and ASCII commands begin with a
//! restricted lowercase alphabet disjoint from the magic values. Detection
//! is performed once per connection and is irrevocable.

use crate::{caret, umbrella};

/// The protocol a connection speaks, fixed for its entire lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Line-oriented memcached text protocol.
    Ascii,
    /// Umbrella binary framing.
    Umbrella,
    /// Caret binary framing.
    Caret,
}

impl Protocol {
    /// True for protocols that allow multiple requests in flight on one
    /// connection, paired by request id.
    #[inline]
    pub fn out_of_order(&self) -> bool {
        matches!(self, Protocol::Umbrella | Protocol::Caret)
    }

    /// Protocol name for diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ascii => "ascii",
            Protocol::Umbrella => "umbrella",
            Protocol::Caret => "caret",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True if `b` can begin a known ASCII command verb.
///
/// Covers the first bytes of: add, append, cas, decr, delete, flush_all,
/// gat, gats, get, gets, incr, lru_crawler, the `m*` meta commands
/// (mg, ms, md, ma, mn, me), prepend, quit, replace, set, shutdown, slabs,
/// stats, touch, verbosity, version, watch.
#[inline]
pub fn is_ascii_command_start(b: u8) -> bool {
    matches!(
        b,
        b'a' | b'c'
            | b'd'
            | b'f'
            | b'g'
            | b'i'
            | b'l'
            | b'm'
            | b'p'
            | b'q'
            | b'r'
            | b's'
            | b't'
            | b'v'
            | b'w'
    )
}

/// Classify a connection from its first received byte.
///
/// Returns `None` when the byte matches no known protocol; the connection
/// must then be terminated without delivering anything downstream.
#[inline]
pub fn determine_protocol(first_byte: u8) -> Option<Protocol> {
    match first_byte {
        caret::MAGIC => Some(Protocol::Caret),
        umbrella::MAGIC => Some(Protocol::Umbrella),
        b if is_ascii_command_start(b) => Some(Protocol::Ascii),
        _ => None,
    }
}
