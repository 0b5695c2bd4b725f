//! Incremental wire parser for a single client connection.
//!
//! The parser owns the connection's [`ReadBuffer`] and a downstream
//! [`ParserCallback`]. The owner reads from the socket into
//! [`Parser::acquire_write_region`], then calls
//! [`Parser::read_data_available`] with the number of bytes received; the
//! parser classifies the protocol from the first byte and delivers every
//! complete frame to the callback exactly once, in wire-arrival order.
//!
//! Parsing never suspends and never copies frame bytes; the slice handed
//! to a callback points into the read buffer and is consumed only after
//! the callback returns.

use umbrella_proto::{caret, determine_protocol, umbrella, FrameInfo, Protocol};

use crate::buffer::ReadBuffer;
use crate::config::ParserConfig;
use crate::metrics;
use crate::reply::ReplyResult;

/// Downstream surface of the frame dispatcher.
///
/// The `*_message_ready` callbacks return false to report a fatal protocol
/// violation discovered downstream; the dispatcher then discards the
/// buffer and reports failure, and the connection owner is expected to
/// close.
pub trait ParserCallback {
    /// A complete umbrella frame (header and body) is in `frame`.
    fn umbrella_message_ready(&mut self, info: &FrameInfo, frame: &[u8]) -> bool;

    /// A complete caret frame (header and body) is in `frame`.
    fn caret_message_ready(&mut self, info: &FrameInfo, frame: &[u8]) -> bool;

    /// New data arrived on an ASCII connection. The callback owns command
    /// parsing and is responsible for consuming what it used from
    /// `buffer`.
    fn handle_ascii(&mut self, buffer: &mut ReadBuffer);

    /// Called on fatal parse error; the stream should be closed.
    fn parse_error(&mut self, result: ReplyResult, reason: &str);
}

/// Incremental frame parser for one connection.
pub struct Parser<C: ParserCallback> {
    callback: C,
    buffer: ReadBuffer,
    config: ParserConfig,
    seen_first_byte: bool,
    protocol: Option<Protocol>,
    out_of_order: bool,
    /// Header of a frame whose body has not fully arrived.
    pending_frame: Option<FrameInfo>,
    /// Messages parsed since the last buffer-size adjustment.
    parsed_messages: u64,
}

impl<C: ParserCallback> Parser<C> {
    /// Create a parser for a freshly accepted connection.
    pub fn new(callback: C, config: ParserConfig) -> Self {
        let buffer = ReadBuffer::new(config.min_buffer_size);
        Self {
            callback,
            buffer,
            config,
            seen_first_byte: false,
            protocol: None,
            out_of_order: false,
            pending_frame: None,
            parsed_messages: 0,
        }
    }

    /// The detected protocol, once the first byte has been seen.
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// True once an out-of-order (binary) protocol has been detected.
    pub fn out_of_order(&self) -> bool {
        self.out_of_order
    }

    /// Header of the frame currently awaiting its body, if any.
    pub fn pending_frame(&self) -> Option<&FrameInfo> {
        self.pending_frame.as_ref()
    }

    /// Messages parsed since the last buffer-size adjustment.
    pub fn parsed_messages(&self) -> u64 {
        self.parsed_messages
    }

    pub fn callback(&self) -> &C {
        &self.callback
    }

    pub fn callback_mut(&mut self) -> &mut C {
        &mut self.callback
    }

    /// The connection's read buffer.
    pub fn buffer(&self) -> &ReadBuffer {
        &self.buffer
    }

    /// Writable region for the next socket read. Call
    /// [`read_data_available`](Self::read_data_available) with the number
    /// of bytes actually read.
    pub fn acquire_write_region(&mut self) -> &mut [u8] {
        self.buffer.acquire_write_region()
    }

    /// The ASCII sub-parser reports each completed message here so the
    /// shrink policy sees ASCII traffic too. Binary frames are counted by
    /// the dispatcher itself.
    pub fn report_message_read(&mut self) {
        self.parsed_messages += 1;
    }

    /// Discard all buffered data. Protocol detection is not reset:
    /// detection is irrevocable for the connection's lifetime.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_frame = None;
    }

    /// Feed `len` bytes written into the last acquired region.
    ///
    /// Returns false on any fatal condition (unknown protocol, malformed
    /// header, callback refusal); the connection owner must then close.
    pub fn read_data_available(&mut self, len: usize) -> bool {
        self.buffer.commit_write(len);
        if self.buffer.is_empty() {
            return true;
        }

        if !self.seen_first_byte {
            self.seen_first_byte = true;
            let first = self.buffer.pending()[0];
            match determine_protocol(first) {
                Some(protocol) => {
                    self.protocol = Some(protocol);
                    self.out_of_order = protocol.out_of_order();
                }
                None => {
                    metrics::PROTOCOL_DETECT_FAILURES.increment();
                    return false;
                }
            }
        }

        let ok = match self.protocol {
            Some(Protocol::Umbrella) | Some(Protocol::Caret) => self.read_binary_frames(),
            Some(Protocol::Ascii) => {
                metrics::ASCII_READS.increment();
                self.callback.handle_ascii(&mut self.buffer);
                true
            }
            // Detection failed on an earlier read; the owner should have
            // closed already.
            None => false,
        };

        self.maybe_shrink();
        ok
    }

    /// Drive the binary frame loop until the buffer runs out of complete
    /// frames.
    fn read_binary_frames(&mut self) -> bool {
        let protocol = match self.protocol {
            Some(p) => p,
            None => return false,
        };

        while !self.buffer.is_empty() {
            let parsed = match protocol {
                Protocol::Umbrella => umbrella::parse_header(self.buffer.pending()),
                Protocol::Caret => caret::parse_header(self.buffer.pending()),
                Protocol::Ascii => unreachable!("binary loop on an ascii connection"),
            };

            let info = match parsed {
                Ok(info) => info,
                Err(e) if e.is_incomplete() => return true,
                Err(_) => {
                    metrics::PARSE_ERRORS.increment();
                    let reason = format!("Error parsing {} header", protocol.as_str());
                    self.callback.parse_error(ReplyResult::RemoteError, &reason);
                    self.buffer.clear();
                    return false;
                }
            };

            let total = info.total_size();
            let pending_len = self.buffer.pending().len();

            // Case 1: the entire frame (and possibly part of the next) is
            // buffered. Deliver, then consume: the slice must stay valid
            // until the callback returns.
            if pending_len >= total {
                let frame = &self.buffer.pending()[..total];
                let accepted = match protocol {
                    Protocol::Umbrella => self.callback.umbrella_message_ready(&info, frame),
                    Protocol::Caret => self.callback.caret_message_ready(&info, frame),
                    Protocol::Ascii => unreachable!(),
                };
                if !accepted {
                    self.buffer.clear();
                    return false;
                }
                match protocol {
                    Protocol::Umbrella => metrics::UMBRELLA_FRAMES.increment(),
                    Protocol::Caret => metrics::CARET_FRAMES.increment(),
                    Protocol::Ascii => unreachable!(),
                }
                self.buffer.consume_front(total);
                self.parsed_messages += 1;
                self.pending_frame = None;
                continue;
            }

            self.pending_frame = Some(info);

            // Case 2: the fixed header parsed but auxiliary header bytes
            // are still in flight. Wait for more data.
            if pending_len < info.header_size as usize {
                return true;
            }

            // Case 3: full header, partial body. Make sure the frame can
            // ever fit, then wait for the rest. Reserving a full frame of
            // tailroom keeps acquire_write_region from growing again while
            // the body streams in.
            if pending_len + self.buffer.tailroom() < total {
                metrics::BUFFER_GROWS.increment();
                self.buffer.raise_target(total);
                self.buffer.reserve_tail(total);
            }
            if self.config.use_nodump_allocator && !self.buffer.is_nodump() {
                // Failure falls back to the dumpable heap buffer.
                self.buffer.promote_to_nodump(total);
            }
            return true;
        }
        true
    }

    /// Shrink the buffer back to steady state after transient large
    /// frames. No-op unless enough messages were parsed since the last
    /// adjustment, the capacity is above the configured maximum, and
    /// nothing is pending.
    fn maybe_shrink(&mut self) {
        if self.parsed_messages >= self.config.adjust_interval
            && self.buffer.capacity() > self.config.max_buffer_size
            && self.buffer.is_empty()
        {
            self.parsed_messages = 0;
            self.buffer.lower_target(self.config.max_buffer_size);
            let steady = self.buffer.target_size();
            self.buffer.shrink_to(steady);
            metrics::BUFFER_SHRINKS.increment();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sink {
        umbrella: Vec<(FrameInfo, Vec<u8>)>,
        caret: Vec<(FrameInfo, Vec<u8>)>,
        ascii: Vec<Vec<u8>>,
        errors: Vec<(ReplyResult, String)>,
        refuse: bool,
    }

    impl ParserCallback for Sink {
        fn umbrella_message_ready(&mut self, info: &FrameInfo, frame: &[u8]) -> bool {
            self.umbrella.push((*info, frame.to_vec()));
            !self.refuse
        }

        fn caret_message_ready(&mut self, info: &FrameInfo, frame: &[u8]) -> bool {
            self.caret.push((*info, frame.to_vec()));
            !self.refuse
        }

        fn handle_ascii(&mut self, buffer: &mut ReadBuffer) {
            self.ascii.push(buffer.pending().to_vec());
            let n = buffer.pending().len();
            buffer.consume_front(n);
        }

        fn parse_error(&mut self, result: ReplyResult, reason: &str) {
            self.errors.push((result, reason.to_string()));
        }
    }

    fn umbrella_frame(request_id: u64, body: &[u8]) -> Vec<u8> {
        let info = FrameInfo {
            header_size: umbrella::HEADER_SIZE as u32,
            body_size: body.len() as u32,
            type_id: 1,
            request_id,
            reply: false,
        };
        let mut out = vec![0u8; umbrella::HEADER_SIZE];
        umbrella::encode_header(&info, &mut out);
        out.extend_from_slice(body);
        out
    }

    fn feed(parser: &mut Parser<Sink>, mut data: &[u8]) -> bool {
        while !data.is_empty() {
            let region = parser.acquire_write_region();
            let n = region.len().min(data.len());
            region[..n].copy_from_slice(&data[..n]);
            if !parser.read_data_available(n) {
                return false;
            }
            data = &data[n..];
        }
        true
    }

    #[test]
    fn detects_umbrella_from_first_byte() {
        let mut parser = Parser::new(Sink::default(), ParserConfig::default());
        assert!(feed(&mut parser, &umbrella_frame(1, b"body")));
        assert_eq!(parser.protocol(), Some(Protocol::Umbrella));
        assert!(parser.out_of_order());
        assert_eq!(parser.callback().umbrella.len(), 1);
    }

    #[test]
    fn detects_ascii_from_first_byte() {
        let mut parser = Parser::new(Sink::default(), ParserConfig::default());
        assert!(feed(&mut parser, b"get foo\r\n"));
        assert_eq!(parser.protocol(), Some(Protocol::Ascii));
        assert!(!parser.out_of_order());
        assert_eq!(parser.callback().ascii, vec![b"get foo\r\n".to_vec()]);
    }

    #[test]
    fn unknown_first_byte_is_fatal() {
        let mut parser = Parser::new(Sink::default(), ParserConfig::default());
        let region = parser.acquire_write_region();
        region[0] = 0x01;
        assert!(!parser.read_data_available(1));
        let sink = parser.callback();
        assert!(sink.umbrella.is_empty());
        assert!(sink.caret.is_empty());
        assert!(sink.ascii.is_empty());
        assert!(sink.errors.is_empty());
    }

    #[test]
    fn callback_refusal_clears_buffer() {
        let mut parser = Parser::new(
            Sink {
                refuse: true,
                ..Sink::default()
            },
            ParserConfig::default(),
        );
        assert!(!feed(&mut parser, &umbrella_frame(1, b"x")));
        assert!(parser.buffer().is_empty());
    }

    #[test]
    fn malformed_header_reports_and_fails() {
        let mut parser = Parser::new(Sink::default(), ParserConfig::default());
        // First frame is valid, second has a corrupt version byte.
        let mut stream = umbrella_frame(1, b"ok");
        let mut bad = umbrella_frame(2, b"");
        bad[1] = 0xEE;
        stream.extend_from_slice(&bad);

        assert!(!feed(&mut parser, &stream));
        let sink = parser.callback();
        assert_eq!(sink.umbrella.len(), 1);
        assert_eq!(sink.errors.len(), 1);
        assert_eq!(sink.errors[0].0, ReplyResult::RemoteError);
        assert_eq!(sink.errors[0].1, "Error parsing umbrella header");
        assert!(parser.buffer().is_empty());
    }

    #[test]
    fn empty_read_is_a_no_op() {
        let mut parser = Parser::new(Sink::default(), ParserConfig::default());
        parser.acquire_write_region();
        assert!(parser.read_data_available(0));
        assert_eq!(parser.protocol(), None);
    }

    #[test]
    fn pending_frame_tracks_partial_body() {
        let mut parser = Parser::new(Sink::default(), ParserConfig::default());
        let frame = umbrella_frame(9, &[b'x'; 100]);
        assert!(feed(&mut parser, &frame[..40]));
        let pending = parser.pending_frame().expect("header parsed");
        assert_eq!(pending.request_id, 9);
        assert_eq!(pending.body_size, 100);

        assert!(feed(&mut parser, &frame[40..]));
        assert!(parser.pending_frame().is_none());
        assert_eq!(parser.callback().umbrella.len(), 1);
    }

    #[test]
    fn ascii_messages_feed_shrink_counter() {
        let mut parser = Parser::new(Sink::default(), ParserConfig::default());
        assert!(feed(&mut parser, b"get foo\r\n"));
        assert_eq!(parser.parsed_messages(), 0);
        parser.report_message_read();
        assert_eq!(parser.parsed_messages(), 1);
    }

    fn nodump_config() -> ParserConfig {
        crate::config::ParserConfigBuilder::new()
            .min_buffer_size(64)
            .max_buffer_size(128)
            .use_nodump_allocator(true)
            .build()
            .unwrap()
    }

    #[test]
    fn nodump_promotion_for_large_partial_frame() {
        let mut parser = Parser::new(Sink::default(), nodump_config());
        let frame = umbrella_frame(3, &[b'v'; 9000]);
        // Header plus a sliver of body: promotion happens while waiting.
        assert!(feed(&mut parser, &frame[..64]));
        assert!(parser.buffer().is_nodump());

        assert!(feed(&mut parser, &frame[64..]));
        assert_eq!(parser.callback().umbrella.len(), 1);
        assert_eq!(parser.callback().umbrella[0].1.len(), frame.len());
    }
}
